//! In-memory transport that records everything sent through it.
//!
//! Used by adapter and handler tests, and by consumers testing their own
//! route tables without opening sockets.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::net::connection::ConnectionId;
use crate::routing::RouteData;
use crate::socket::context::ConnectionContext;
use crate::socket::transport::{ConnectionHandle, Signal, Transport};

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<String>,
    ended: Option<(u16, String)>,
    topics: BTreeSet<String>,
    published: Vec<(String, String)>,
    signals: Vec<Signal>,
}

/// A [`Transport`] that keeps frames in memory.
#[derive(Debug)]
pub struct RecordingTransport {
    id: ConnectionId,
    user_data: Option<Value>,
    recorded: Mutex<Recorded>,
}

impl RecordingTransport {
    pub fn new(user_data: Option<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            user_data,
            recorded: Mutex::new(Recorded::default()),
        })
    }

    /// Transport whose user data is `context`.
    pub fn for_context(context: &ConnectionContext) -> Arc<Self> {
        Self::new(Some(context.to_user_data()))
    }

    pub fn handle(self: &Arc<Self>) -> ConnectionHandle {
        ConnectionHandle::new(Arc::clone(self) as Arc<dyn Transport>)
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every frame sent (not including the final frame passed to `end`), parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.lock()
            .sent
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap_or_else(|_| Value::String(frame.clone())))
            .collect()
    }

    /// Close code and final frame, if the connection was ended.
    pub fn ended(&self) -> Option<(u16, Value)> {
        self.lock().ended.as_ref().map(|(code, frame)| {
            let frame = serde_json::from_str(frame).unwrap_or_else(|_| Value::String(frame.clone()));
            (*code, frame)
        })
    }

    pub fn topics(&self) -> Vec<String> {
        self.lock().topics.iter().cloned().collect()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.lock().published.clone()
    }

    /// Subscription signals raised so far.
    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.clone()
    }
}

impl Transport for RecordingTransport {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn user_data(&self) -> Option<Value> {
        self.user_data.clone()
    }

    fn send(&self, frame: String) -> bool {
        let mut recorded = self.lock();
        if recorded.ended.is_some() {
            return false;
        }
        recorded.sent.push(frame);
        true
    }

    fn end(&self, code: u16, frame: String) {
        let mut recorded = self.lock();
        if recorded.ended.is_none() {
            recorded.ended = Some((code, frame));
        }
    }

    fn is_ended(&self) -> bool {
        self.lock().ended.is_some()
    }

    fn subscribe(&self, topic: &str) -> bool {
        let mut recorded = self.lock();
        if !recorded.topics.insert(topic.to_string()) {
            return false;
        }
        recorded.signals.push(Signal::Subscription {
            topic: topic.to_string(),
            new_count: 1,
            old_count: 0,
        });
        true
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        let mut recorded = self.lock();
        if !recorded.topics.remove(topic) {
            return false;
        }
        recorded.signals.push(Signal::Subscription {
            topic: topic.to_string(),
            new_count: 0,
            old_count: 1,
        });
        true
    }

    fn publish(&self, topic: &str, frame: String) -> usize {
        let mut recorded = self.lock();
        let delivered = recorded.topics.contains(topic) as usize;
        recorded.published.push((topic.to_string(), frame));
        delivered
    }
}

/// Build a context as if `path` had matched `route_path` with `data`.
pub fn context_for(path: &str, route_path: &str, data: &[(&str, &str)]) -> ConnectionContext {
    let route_data: RouteData = data
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ConnectionContext::new(path, route_path, route_data)
}
