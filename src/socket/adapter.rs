//! Connection lifecycle adapter.
//!
//! # Responsibilities
//! - Decide at upgrade time whether a path is served, and build its context
//! - Re-validate the stored context on every callback
//! - Run all handlers bound to an event, in order, sharing one resolution cache
//! - Translate outcomes into replies and error frames
//!
//! # Data Flow
//! ```text
//! transport callback
//!     → context check (invalid ⇒ end with InvalidConnection)
//!     → frame decode (message only; malformed ⇒ InvalidData)
//!     → RouteTable::get_events(path, event)
//!     → EventHandler::run × N (one ResolutionCache)
//!     → cache teardown (always)
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::invoker::Outcome;
use crate::observability::metrics::{DISPATCH_DURATION_SECONDS, DISPATCH_TOTAL, WIRE_ERRORS_TOTAL};
use crate::routing::{EventKey, RouteTable};
use crate::scope::{BoolTokens, Payload, ResolutionCache, ResolveContext};
use crate::socket::context::ConnectionContext;
use crate::socket::transport::ConnectionHandle;
use crate::socket::wire::{parse_frame, ErrorCode, ErrorFrame};

/// Frames above this size are rejected unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// What one callback did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Event label, once known.
    pub event: Option<String>,
    pub handlers: usize,
    pub replies: usize,
    pub scope_failures: usize,
    pub handler_failures: usize,
    /// Set when the callback was refused before any handler ran.
    pub rejected: Option<ErrorCode>,
}

impl DispatchReport {
    fn rejected(code: ErrorCode) -> Self {
        Self {
            rejected: Some(code),
            ..Self::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected.is_some()
    }
}

/// Maps transport callbacks onto route table lookups and handler runs.
#[derive(Debug, Clone)]
pub struct SocketAdapter {
    table: Arc<RouteTable>,
    tokens: BoolTokens,
    max_frame_bytes: usize,
}

impl SocketAdapter {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self {
            table,
            tokens: BoolTokens::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_tokens(mut self, tokens: BoolTokens) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Context for a connection to `path`, or `None` when no route matches.
    pub fn upgrade(&self, path: &str, extra: Map<String, Value>) -> Option<ConnectionContext> {
        let Some(matched) = self.table.match_path(path) else {
            tracing::debug!(path, "No route for upgrade");
            return None;
        };
        let route_path = matched.pattern().as_str().to_string();
        tracing::debug!(path, route = %route_path, "Upgrade accepted");
        Some(ConnectionContext::new(path, route_path, matched.into_route_data()).with_extra(extra))
    }

    pub async fn on_open(&self, conn: &ConnectionHandle) -> DispatchReport {
        self.lifecycle(conn, EventKey::Open, Map::new()).await
    }

    pub async fn on_close(&self, conn: &ConnectionHandle, code: u16, reason: &str) -> DispatchReport {
        let payload = json!({ "code": code, "reason": reason });
        self.lifecycle(conn, EventKey::Close, into_map(payload)).await
    }

    pub async fn on_drain(&self, conn: &ConnectionHandle) -> DispatchReport {
        self.lifecycle(conn, EventKey::Drain, Map::new()).await
    }

    pub async fn on_subscription(
        &self,
        conn: &ConnectionHandle,
        topic: &str,
        new_count: usize,
        old_count: usize,
    ) -> DispatchReport {
        let payload = json!({ "topic": topic, "new_count": new_count, "old_count": old_count });
        self.lifecycle(conn, EventKey::Subscription, into_map(payload)).await
    }

    /// Decode one inbound frame and dispatch it.
    pub async fn on_message(&self, conn: &ConnectionHandle, frame: &[u8]) -> DispatchReport {
        let context = match self.context(conn) {
            Ok(context) => context,
            Err(report) => return report,
        };

        let message = match parse_frame(frame, self.max_frame_bytes) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(connection_id = %conn.id(), %error, "Malformed frame");
                send_error(conn, ErrorCode::InvalidData, error.to_string());
                return DispatchReport::rejected(ErrorCode::InvalidData);
            }
        };

        self.dispatch(conn, &context, EventKey::Message(message.event), message.payload)
            .await
    }

    async fn lifecycle(&self, conn: &ConnectionHandle, event: EventKey, payload: Map<String, Value>) -> DispatchReport {
        match self.context(conn) {
            Ok(context) => self.dispatch(conn, &context, event, Payload::new(payload)).await,
            Err(report) => report,
        }
    }

    fn context(&self, conn: &ConnectionHandle) -> Result<ConnectionContext, DispatchReport> {
        ConnectionContext::from_user_data(conn.user_data().as_ref()).map_err(|error| {
            tracing::warn!(connection_id = %conn.id(), %error, "Invalid connection context, closing");
            let code = ErrorCode::InvalidConnection;
            metrics::counter!(WIRE_ERRORS_TOTAL, "code" => code.label()).increment(1);
            conn.end(code.as_u16(), ErrorFrame::new(code, error.to_string()).to_text());
            DispatchReport::rejected(code)
        })
    }

    async fn dispatch(
        &self,
        conn: &ConnectionHandle,
        context: &ConnectionContext,
        event: EventKey,
        payload: Payload,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            event: Some(event.label().to_string()),
            ..DispatchReport::default()
        };

        let handlers = self.table.get_events(&context.path, &event);
        if handlers.is_empty() {
            tracing::debug!(connection_id = %conn.id(), path = %context.path, event = %event, "No handlers bound");
            return report;
        }

        let payload = Arc::new(payload);
        let ctx = ResolveContext {
            payload: &payload,
            connection: context,
            handle: conn,
            tokens: &self.tokens,
        };
        let mut cache = ResolutionCache::new();
        let started = Instant::now();

        for handler in &handlers {
            let outcome = handler.run(&context.route_path, &event, &ctx, &mut cache).await;
            metrics::counter!(
                DISPATCH_TOTAL,
                "event" => event.label().to_string(),
                "outcome" => outcome.label()
            )
            .increment(1);
            report.handlers += 1;
            deliver(conn, outcome, &mut report);
        }

        cache.teardown().await;
        metrics::histogram!(DISPATCH_DURATION_SECONDS, "event" => event.label().to_string())
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            connection_id = %conn.id(),
            event = %event,
            handlers = report.handlers,
            replies = report.replies,
            failures = report.scope_failures + report.handler_failures,
            "Dispatch cycle finished"
        );
        report
    }
}

fn deliver(conn: &ConnectionHandle, outcome: Outcome, report: &mut DispatchReport) {
    if let Some((code, message)) = outcome.wire_error() {
        send_error(conn, code, message);
    }
    match outcome {
        Outcome::None => {}
        Outcome::Reply(reply) => {
            report.replies += 1;
            conn.reply(&reply);
        }
        Outcome::ScopeFailure(_) => report.scope_failures += 1,
        Outcome::HandlerFailure(_) => report.handler_failures += 1,
    }
}

fn send_error(conn: &ConnectionHandle, code: ErrorCode, message: String) {
    metrics::counter!(WIRE_ERRORS_TOTAL, "code" => code.label()).increment(1);
    conn.send(ErrorFrame::new(code, message).to_text());
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
