//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Track socket state (Unconnected → Upgrading → Open → Closed)
//! - Generate unique connection IDs for tracing
//! - Count live sockets and enforce the connection limit
//! - Let shutdown wait until every socket has closed

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::observability::metrics::CONNECTIONS_ACTIVE;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Socket lifecycle. `Closed` is terminal; a reconnect is a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    /// Route matched, handshake in progress.
    Upgrading,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection transition {from:?} → {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Whether callbacks may still be dispatched.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Move to `next`, rejecting anything but a forward step or an early close.
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        use ConnectionState::*;
        let allowed = matches!(
            (*self, next),
            (Unconnected, Upgrading) | (Upgrading, Open) | (Upgrading, Closed) | (Open, Closed)
        );
        if !allowed {
            return Err(InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

/// Counts live sockets.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
    max_connections: u64,
}

impl ConnectionTracker {
    /// Tracker refusing new connections once `max_connections` are live (0 = unlimited).
    pub fn new(max_connections: u64) -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            max_connections,
        }
    }

    /// Reserve a slot. Returns `None` when the limit is reached.
    pub fn try_track(&self) -> Option<ConnectionGuard> {
        let reserved = self
            .active_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (self.max_connections == 0 || count < self.max_connections).then_some(count + 1)
            });
        let count = reserved.ok()? + 1;
        metrics::gauge!(CONNECTIONS_ACTIVE).set(count as f64);
        Some(ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        })
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every connection has closed, or `timeout` elapses.
    /// Returns `true` when all closed in time.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!(CONNECTIONS_ACTIVE).set(remaining as f64);
        tracing::trace!(connection_id = %self.id, remaining, "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_tracker_counts_and_limits() {
        let tracker = ConnectionTracker::new(2);
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.try_track().unwrap();
        let guard2 = tracker.try_track().unwrap();
        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.try_track().is_none());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        let guard3 = tracker.try_track().unwrap();
        assert_ne!(guard2.id(), guard3.id());
    }

    #[test]
    fn test_state_machine() {
        let mut state = ConnectionState::Unconnected;
        assert!(state.advance(ConnectionState::Open).is_err());
        state.advance(ConnectionState::Upgrading).unwrap();
        state.advance(ConnectionState::Open).unwrap();
        assert!(state.is_open());
        state.advance(ConnectionState::Closed).unwrap();

        let err = state.advance(ConnectionState::Open).unwrap_err();
        assert_eq!(err.from, ConnectionState::Closed);
        assert_eq!(state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_wait_for_idle() {
        let tracker = ConnectionTracker::default();
        let guard = tracker.try_track().unwrap();
        assert!(!tracker.wait_for_idle(Duration::from_millis(60)).await);
        drop(guard);
        assert!(tracker.wait_for_idle(Duration::from_millis(60)).await);
    }
}
