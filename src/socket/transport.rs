//! Transport abstraction consumed by the lifecycle adapter.
//!
//! # Responsibilities
//! - Expose the per-connection operations handlers may use (send, end, pub/sub)
//! - Carry the opaque user data stored at upgrade time
//! - Queue outbound frames for the connection's writer task
//!
//! # Design Decisions
//! - Sends never block: a full queue drops the frame and counts it
//! - Subscription changes and drain are reported back as [`Signal`]s so the
//!   connection task can run their handlers outside the current dispatch cycle

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::net::connection::ConnectionId;
use crate::observability::metrics::FRAMES_DROPPED_TOTAL;
use crate::socket::pubsub::TopicHub;
use crate::socket::wire::Reply;

/// Operations a connection offers to the adapter and to handlers.
pub trait Transport: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Data stored on the connection when it was upgraded.
    fn user_data(&self) -> Option<Value>;

    /// Queue a text frame. Returns `false` when the frame was not queued.
    fn send(&self, frame: String) -> bool;

    /// Send a final frame, then close with `code`.
    fn end(&self, code: u16, frame: String);

    fn is_ended(&self) -> bool;

    /// Returns `false` when already subscribed.
    fn subscribe(&self, topic: &str) -> bool;

    /// Returns `false` when not subscribed.
    fn unsubscribe(&self, topic: &str) -> bool;

    /// Deliver `frame` to every subscriber of `topic`; returns how many received it.
    fn publish(&self, topic: &str, frame: String) -> usize;
}

/// Cloneable handle to a live connection, handed to handlers.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<dyn Transport>,
}

impl ConnectionHandle {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { inner: transport }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    pub fn user_data(&self) -> Option<Value> {
        self.inner.user_data()
    }

    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.inner.send(frame.into())
    }

    /// Serialise `value` and queue it.
    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.inner.send(text),
            Err(error) => {
                tracing::warn!(connection_id = %self.id(), %error, "Failed to serialise outbound frame");
                false
            }
        }
    }

    pub fn reply(&self, reply: &Reply) -> bool {
        self.inner.send(reply.to_text())
    }

    pub fn end(&self, code: u16, frame: impl Into<String>) {
        self.inner.end(code, frame.into())
    }

    pub fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }

    pub fn subscribe(&self, topic: &str) -> bool {
        self.inner.subscribe(topic)
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.inner.unsubscribe(topic)
    }

    pub fn publish(&self, topic: &str, frame: impl Into<String>) -> usize {
        self.inner.publish(topic, frame.into())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionHandle").field(&self.id()).finish()
    }
}

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

/// Events raised by the transport for the connection task to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Subscription {
        topic: String,
        new_count: usize,
        old_count: usize,
    },
    Drain,
}

/// Outbound queue depth with a high-water mark.
///
/// Once the depth crosses the mark, the next time the queue empties is
/// reported as a drain.
#[derive(Debug)]
pub struct Backlog {
    queued: AtomicUsize,
    high_water: usize,
    pressured: AtomicBool,
}

impl Backlog {
    pub fn new(high_water: usize) -> Self {
        Self {
            queued: AtomicUsize::new(0),
            high_water,
            pressured: AtomicBool::new(false),
        }
    }

    fn enqueue(&self) {
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > self.high_water {
            self.pressured.store(true, Ordering::SeqCst);
        }
    }

    fn cancel(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record one frame written; `true` when this write drained a pressured queue.
    pub fn written(&self) -> bool {
        let remaining = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        remaining == 0 && self.pressured.swap(false, Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outlet {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    backlog: Arc<Backlog>,
    dropped: Arc<AtomicU64>,
}

impl Outlet {
    pub fn new(connection_id: ConnectionId, sender: mpsc::Sender<Outbound>, backlog: Arc<Backlog>) -> Self {
        Self {
            connection_id,
            sender,
            backlog,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue without waiting.
    pub fn push(&self, item: Outbound) -> bool {
        self.backlog.enqueue();
        match self.sender.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.backlog.cancel();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(FRAMES_DROPPED_TOTAL).increment(1);
                tracing::warn!(connection_id = %self.connection_id, dropped, "Outbound queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.backlog.cancel();
                false
            }
        }
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Production transport backed by the connection's outbound channel.
pub struct ChannelTransport {
    id: ConnectionId,
    user_data: Value,
    outlet: Outlet,
    signals: mpsc::UnboundedSender<Signal>,
    hub: Arc<TopicHub>,
    ended: AtomicBool,
}

impl ChannelTransport {
    pub fn new(user_data: Value, outlet: Outlet, signals: mpsc::UnboundedSender<Signal>, hub: Arc<TopicHub>) -> Self {
        Self {
            id: outlet.connection_id(),
            user_data,
            outlet,
            signals,
            hub,
            ended: AtomicBool::new(false),
        }
    }

    /// Close without a final frame. No-op when already ended.
    pub fn close(&self, code: u16, reason: &str) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.outlet.push(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn signal(&self, signal: Signal) {
        // The receiver only goes away once the connection task has finished.
        let _ = self.signals.send(signal);
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn user_data(&self) -> Option<Value> {
        Some(self.user_data.clone())
    }

    fn send(&self, frame: String) -> bool {
        if self.is_ended() {
            return false;
        }
        self.outlet.push(Outbound::Frame(frame))
    }

    fn end(&self, code: u16, frame: String) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outlet.push(Outbound::Frame(frame));
        self.outlet.push(Outbound::Close {
            code,
            reason: String::new(),
        });
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn subscribe(&self, topic: &str) -> bool {
        match self.hub.subscribe(topic, self.outlet.clone()) {
            Some((new_count, old_count)) => {
                self.signal(Signal::Subscription {
                    topic: topic.to_string(),
                    new_count,
                    old_count,
                });
                true
            }
            None => false,
        }
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        match self.hub.unsubscribe(topic, self.id) {
            Some((new_count, old_count)) => {
                self.signal(Signal::Subscription {
                    topic: topic.to_string(),
                    new_count,
                    old_count,
                });
                true
            }
            None => false,
        }
    }

    fn publish(&self, topic: &str, frame: String) -> usize {
        self.hub.publish(topic, &frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_reports_drain_only_after_pressure() {
        let backlog = Backlog::new(2);
        backlog.enqueue();
        assert!(!backlog.written());

        for _ in 0..3 {
            backlog.enqueue();
        }
        assert!(!backlog.written());
        assert!(!backlog.written());
        assert!(backlog.written());
        assert!(backlog.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_frames() {
        let (tx, mut rx) = mpsc::channel(1);
        let outlet = Outlet::new(ConnectionId::new(), tx, Arc::new(Backlog::new(8)));

        assert!(outlet.push(Outbound::Frame("a".into())));
        assert!(!outlet.push(Outbound::Frame("b".into())));
        assert_eq!(outlet.dropped(), 1);
        assert_eq!(rx.recv().await, Some(Outbound::Frame("a".into())));
    }

    #[tokio::test]
    async fn test_end_sends_final_frame_then_close() {
        let (tx, mut rx) = mpsc::channel(8);
        let (signals, _signal_rx) = mpsc::unbounded_channel();
        let outlet = Outlet::new(ConnectionId::new(), tx, Arc::new(Backlog::new(8)));
        let transport = ChannelTransport::new(Value::Null, outlet, signals, Arc::new(TopicHub::new()));

        transport.end(1001, "bye".into());
        transport.end(1001, "again".into());
        assert!(!transport.send("late".into()));

        assert_eq!(rx.recv().await, Some(Outbound::Frame("bye".into())));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close { code: 1001, reason: String::new() })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_raises_signal_with_counts() {
        let hub = Arc::new(TopicHub::new());
        let (signals, mut signal_rx) = mpsc::unbounded_channel();
        let make = |signals: mpsc::UnboundedSender<Signal>| {
            let (tx, _rx) = mpsc::channel(8);
            let outlet = Outlet::new(ConnectionId::new(), tx, Arc::new(Backlog::new(8)));
            ChannelTransport::new(Value::Null, outlet, signals, Arc::clone(&hub))
        };
        let first = make(signals.clone());
        let second = make(signals);

        assert!(first.subscribe("board:1"));
        assert!(!first.subscribe("board:1"));
        assert!(second.subscribe("board:1"));
        assert!(first.unsubscribe("board:1"));

        let counts: Vec<(usize, usize)> = std::iter::from_fn(|| signal_rx.try_recv().ok())
            .map(|signal| match signal {
                Signal::Subscription { new_count, old_count, .. } => (new_count, old_count),
                Signal::Drain => panic!("unexpected drain"),
            })
            .collect();
        assert_eq!(counts, [(1, 0), (2, 1), (1, 2)]);
    }
}
