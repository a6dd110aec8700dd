//! Per-socket connection task.
//!
//! # Responsibilities
//! - Split the upgraded socket into a reader loop and a writer task
//! - Drive the adapter callbacks from inbound frames and transport signals
//! - Walk the connection state machine and release topics on close
//!
//! # Data Flow
//! ```text
//! client ──frames──→ reader loop ──→ SocketAdapter::on_message
//!                    signals     ──→ on_subscription / on_drain
//! handlers ──send──→ Outlet (bounded mpsc) ──→ writer task ──→ client
//! ```
//!
//! # Design Decisions
//! - One cycle at a time per socket; signals raised during a cycle are
//!   dispatched after it
//! - The writer never blocks a handler: a full queue drops the frame
//! - Ping/pong is answered by the socket layer

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::http::server::AppState;
use crate::net::connection::{ConnectionGuard, ConnectionState};
use crate::socket::{
    Backlog, ChannelTransport, ConnectionContext, ConnectionHandle, DispatchReport, ErrorCode, Outbound, Outlet,
    Signal,
};

/// Close code sent when the server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Reported to close handlers when the peer vanished without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
const CLOSE_NO_STATUS: u16 = 1005;

/// How long the writer gets to flush after the socket is closed.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

enum Exit {
    Peer { code: u16, reason: String },
    Ended,
    Shutdown,
}

/// Run one upgraded socket to completion.
pub async fn serve_socket(socket: WebSocket, context: ConnectionContext, guard: ConnectionGuard, state: AppState) {
    let span = tracing::info_span!(
        "socket",
        connection_id = %guard.id(),
        path = %context.path,
        route = %context.route_path
    );
    run_socket(socket, context, guard, state).instrument(span).await
}

async fn run_socket(socket: WebSocket, context: ConnectionContext, guard: ConnectionGuard, state: AppState) {
    let mut lifecycle = ConnectionState::Upgrading;
    let id = guard.id();
    let adapter = Arc::clone(&state.adapter);

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.websocket.outbound_capacity);
    let (signal_tx, mut signals) = mpsc::unbounded_channel();
    let backlog = Arc::new(Backlog::new(state.websocket.high_water));

    let outlet = Outlet::new(id, tx, Arc::clone(&backlog));
    let transport = Arc::new(ChannelTransport::new(
        context.to_user_data(),
        outlet,
        signal_tx.clone(),
        Arc::clone(&state.hub),
    ));
    let handle = ConnectionHandle::new(transport.clone());
    let mut writer = Some(tokio::spawn(write_frames(sink, rx, backlog, signal_tx)));

    if let Err(error) = lifecycle.advance(ConnectionState::Open) {
        tracing::error!(%error, "Socket state machine rejected open");
        return;
    }
    metrics::counter!(crate::observability::metrics::CONNECTIONS_TOTAL).increment(1);
    tracing::info!("Socket open");

    let mut context_valid = track(&adapter.on_open(&handle).await);
    let mut shutdown = state.shutdown.subscribe();

    let exit = loop {
        if handle.is_ended() {
            break Exit::Ended;
        }
        tokio::select! {
            biased;
            _ = shutdown.recv() => break Exit::Shutdown,
            Some(signal) = signals.recv() => {
                let report = match signal {
                    Signal::Subscription { topic, new_count, old_count } => {
                        adapter.on_subscription(&handle, &topic, new_count, old_count).await
                    }
                    Signal::Drain => adapter.on_drain(&handle).await,
                };
                context_valid &= track(&report);
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    context_valid &= track(&adapter.on_message(&handle, text.as_str().as_bytes()).await);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    context_valid &= track(&adapter.on_message(&handle, &bytes).await);
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (frame.code, frame.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    break Exit::Peer { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::debug!(%error, "Socket read failed");
                    break Exit::Peer { code: CLOSE_ABNORMAL, reason: String::new() };
                }
                None => break Exit::Peer { code: CLOSE_ABNORMAL, reason: String::new() },
            },
        }
    };

    let (code, reason) = match exit {
        Exit::Peer { code, reason } => (code, reason),
        Exit::Shutdown => (CLOSE_GOING_AWAY, "server shutting down".to_string()),
        // Ended by a handler or by a failed context check: the writer knows the code.
        Exit::Ended => match writer.take() {
            Some(task) => finish_writer(task)
                .await
                .unwrap_or((ErrorCode::ServerError.as_u16(), String::new())),
            None => (ErrorCode::ServerError.as_u16(), String::new()),
        },
    };

    if context_valid {
        adapter.on_close(&handle, code, &reason).await;
    }
    if let Err(error) = lifecycle.advance(ConnectionState::Closed) {
        tracing::error!(%error, "Socket state machine rejected close");
    }

    let released = state.hub.remove_connection(id);
    transport.close(code, &reason);
    if let Some(task) = writer.take() {
        finish_writer(task).await;
    }
    while let Ok(signal) = signals.try_recv() {
        tracing::debug!(?signal, state = ?lifecycle, "Connection closed, callback ignored");
    }

    tracing::info!(code, reason = %reason, topics = released.len(), "Socket closed");
    drop(guard);
}

/// `false` once the adapter refused the connection's context.
fn track(report: &DispatchReport) -> bool {
    report.rejected != Some(ErrorCode::InvalidConnection)
}

/// Write queued frames until a close is queued or every sender is gone.
/// Returns the close code and reason that were sent.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Outbound>,
    backlog: Arc<Backlog>,
    signals: mpsc::UnboundedSender<Signal>,
) -> Option<(u16, String)> {
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Frame(text) => {
                let sent = sink.send(Message::Text(text.into())).await;
                if backlog.written() {
                    let _ = signals.send(Signal::Drain);
                }
                if let Err(error) = sent {
                    tracing::debug!(%error, "Socket write failed");
                    return None;
                }
            }
            Outbound::Close { code, reason } => {
                backlog.written();
                let frame = CloseFrame {
                    code,
                    reason: reason.clone().into(),
                };
                if let Err(error) = sink.send(Message::Close(Some(frame))).await {
                    tracing::trace!(%error, "Close frame not delivered");
                }
                return Some((code, reason));
            }
        }
    }
    None
}

async fn finish_writer(task: JoinHandle<Option<(u16, String)>>) -> Option<(u16, String)> {
    let abort = task.abort_handle();
    match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, task).await {
        Ok(Ok(closed)) => closed,
        Ok(Err(error)) => {
            tracing::warn!(%error, "Socket writer task failed");
            None
        }
        Err(_) => {
            tracing::warn!("Socket writer did not finish in time, aborting");
            abort.abort();
            None
        }
    }
}
