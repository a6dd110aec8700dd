//! Topic-based fan-out between connections.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::net::connection::ConnectionId;
use crate::observability::metrics::PUBLISHED_FRAMES_TOTAL;
use crate::socket::transport::{Outbound, Outlet};

/// Topic → subscribed connections.
#[derive(Debug, Default)]
pub struct TopicHub {
    topics: DashMap<String, HashMap<ConnectionId, Outlet>>,
}

impl TopicHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns `(new_count, old_count)`, or `None` if it was already subscribed.
    pub fn subscribe(&self, topic: &str, outlet: Outlet) -> Option<(usize, usize)> {
        let mut subscribers = self.topics.entry(topic.to_string()).or_default();
        let old_count = subscribers.len();
        let id = outlet.connection_id();
        if subscribers.contains_key(&id) {
            return None;
        }
        subscribers.insert(id, outlet);
        tracing::debug!(topic, connection_id = %id, subscribers = old_count + 1, "Subscribed");
        Some((old_count + 1, old_count))
    }

    /// Remove a subscriber. Returns `(new_count, old_count)`, or `None` if it was not subscribed.
    pub fn unsubscribe(&self, topic: &str, id: ConnectionId) -> Option<(usize, usize)> {
        let counts = {
            let mut subscribers = self.topics.get_mut(topic)?;
            let old_count = subscribers.len();
            subscribers.remove(&id)?;
            (subscribers.len(), old_count)
        };
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        tracing::debug!(topic, connection_id = %id, subscribers = counts.0, "Unsubscribed");
        Some(counts)
    }

    /// Drop `id` from every topic; returns `(topic, new_count, old_count)` per topic left.
    pub fn remove_connection(&self, id: ConnectionId) -> Vec<(String, usize, usize)> {
        let topics: Vec<String> = self
            .topics
            .iter()
            .filter(|entry| entry.value().contains_key(&id))
            .map(|entry| entry.key().clone())
            .collect();

        topics
            .into_iter()
            .filter_map(|topic| {
                self.unsubscribe(&topic, id)
                    .map(|(new_count, old_count)| (topic, new_count, old_count))
            })
            .collect()
    }

    /// Queue `frame` for every subscriber of `topic`; returns how many accepted it.
    pub fn publish(&self, topic: &str, frame: &str) -> usize {
        let Some(subscribers) = self.topics.get(topic) else {
            return 0;
        };
        let delivered = subscribers
            .values()
            .filter(|outlet| outlet.push(Outbound::Frame(frame.to_string())))
            .count();
        metrics::counter!(PUBLISHED_FRAMES_TOTAL).increment(delivered as u64);
        tracing::trace!(topic, subscribers = subscribers.len(), delivered, "Published");
        delivered
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
