//! Route table: pattern → event → ordered handlers.
//!
//! # Responsibilities
//! - Store compiled patterns in registration order
//! - Keep handlers for each event in registration order (dispatch order)
//! - Merge tables, rejecting patterns that disagree on placeholder names
//!
//! # Design Decisions
//! - Built at start-up, immutable once shared (no locks on the hot path)
//! - First structural match wins
//! - Conflicts are fatal and reported before any mutation happens

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::RegistrationError;
use crate::invoker::EventHandler;
use crate::routing::pattern::{RouteData, RoutePattern};

/// Event a handler is bound to.
///
/// The lifecycle tags are reserved: an inbound frame whose `event` field reads
/// `"open"` is routed to `Message("open")`, never to [`EventKey::Open`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Open,
    Close,
    Drain,
    Subscription,
    Message(String),
}

impl EventKey {
    /// Convenience constructor for application events.
    pub fn message(name: impl Into<String>) -> Self {
        Self::Message(name.into())
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &str {
        match self {
            Self::Open => "@open",
            Self::Close => "@close",
            Self::Drain => "@drain",
            Self::Subscription => "@subscription",
            Self::Message(name) => name,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One compiled pattern and its event bindings.
#[derive(Clone)]
pub struct Route {
    pattern: RoutePattern,
    events: HashMap<EventKey, Vec<Arc<EventHandler>>>,
}

impl Route {
    fn new(pattern: RoutePattern) -> Self {
        Self {
            pattern,
            events: HashMap::new(),
        }
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    /// Handlers bound to `event`, in dispatch order.
    pub fn handlers(&self, event: &EventKey) -> &[Arc<EventHandler>] {
        self.events.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Events with at least one handler.
    pub fn events(&self) -> impl Iterator<Item = &EventKey> {
        self.events.keys()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<String> = self
            .events
            .iter()
            .map(|(event, handlers)| format!("{event}×{}", handlers.len()))
            .collect();
        f.debug_struct("Route")
            .field("pattern", &self.pattern.as_str())
            .field("events", &events)
            .finish()
    }
}

/// A successful path lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    route: &'a Route,
    data: RouteData,
}

impl<'a> RouteMatch<'a> {
    pub fn pattern(&self) -> &'a RoutePattern {
        &self.route.pattern
    }

    pub fn route_data(&self) -> &RouteData {
        &self.data
    }

    pub fn into_route_data(self) -> RouteData {
        self.data
    }

    pub fn handlers(&self, event: &EventKey) -> &'a [Arc<EventHandler>] {
        self.route.handlers(event)
    }
}

/// Mapping from compiled patterns to event handlers.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `event` on `pattern`, compiling the pattern if it is new.
    pub fn register(
        &mut self,
        pattern: &str,
        event: EventKey,
        handler: EventHandler,
    ) -> Result<(), RegistrationError> {
        let index = self.route_index(pattern)?;
        let route = &mut self.routes[index];
        tracing::debug!(
            pattern = %route.pattern,
            event = %event,
            handler = handler.name(),
            "Registered event handler"
        );
        route.events.entry(event).or_default().push(Arc::new(handler));
        Ok(())
    }

    /// Start a fluent registration block for `pattern`.
    pub fn route(&mut self, pattern: &str) -> Result<RouteBuilder<'_>, RegistrationError> {
        let index = self.route_index(pattern)?;
        Ok(RouteBuilder { table: self, index })
    }

    /// Find the first route whose pattern matches `path`.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            route
                .pattern
                .matches(path)
                .map(|data| RouteMatch { route, data })
        })
    }

    /// Handlers bound to `event` on the route matching `path` (empty when nothing matches).
    pub fn get_events(&self, path: &str, event: &EventKey) -> Vec<Arc<EventHandler>> {
        self.match_path(path)
            .map(|m| m.handlers(event).to_vec())
            .unwrap_or_default()
    }

    /// Union `other` into `self`.
    ///
    /// For routes present in both tables, `self`'s handlers stay ahead of
    /// `other`'s for every shared event. Fails without modifying `self` when a
    /// literal path is declared with different placeholder names.
    pub fn merge(&mut self, other: RouteTable) -> Result<(), RegistrationError> {
        for incoming in &other.routes {
            if let Some(existing) = self
                .routes
                .iter()
                .find(|r| r.pattern.conflicts_with(&incoming.pattern))
            {
                return Err(conflict(&existing.pattern, &incoming.pattern));
            }
        }

        for incoming in other.routes {
            match self
                .routes
                .iter_mut()
                .find(|r| r.pattern.same_route(&incoming.pattern))
            {
                Some(existing) => {
                    for (event, handlers) in incoming.events {
                        existing.events.entry(event).or_default().extend(handlers);
                    }
                }
                None => self.routes.push(incoming),
            }
        }
        Ok(())
    }

    /// Routes in registration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn route_index(&mut self, pattern: &str) -> Result<usize, RegistrationError> {
        let compiled = RoutePattern::compile(pattern)?;
        for (index, route) in self.routes.iter().enumerate() {
            if route.pattern.same_route(&compiled) {
                return Ok(index);
            }
            if route.pattern.conflicts_with(&compiled) {
                return Err(conflict(&route.pattern, &compiled));
            }
        }
        self.routes.push(Route::new(compiled));
        Ok(self.routes.len() - 1)
    }
}

fn conflict(left: &RoutePattern, right: &RoutePattern) -> RegistrationError {
    RegistrationError::RouteConflict {
        left: left.as_str().to_string(),
        left_vars: left.describe_variables(),
        right: right.as_str().to_string(),
        right_vars: right.describe_variables(),
    }
}

/// Fluent registration for a single pattern.
pub struct RouteBuilder<'a> {
    table: &'a mut RouteTable,
    index: usize,
}

impl RouteBuilder<'_> {
    pub fn on(self, event: impl Into<String>, handler: EventHandler) -> Self {
        self.bind(EventKey::Message(event.into()), handler)
    }

    pub fn on_open(self, handler: EventHandler) -> Self {
        self.bind(EventKey::Open, handler)
    }

    pub fn on_close(self, handler: EventHandler) -> Self {
        self.bind(EventKey::Close, handler)
    }

    pub fn on_drain(self, handler: EventHandler) -> Self {
        self.bind(EventKey::Drain, handler)
    }

    pub fn on_subscription(self, handler: EventHandler) -> Self {
        self.bind(EventKey::Subscription, handler)
    }

    fn bind(self, event: EventKey, handler: EventHandler) -> Self {
        let route = &mut self.table.routes[self.index];
        tracing::debug!(
            pattern = %route.pattern,
            event = %event,
            handler = handler.name(),
            "Registered event handler"
        );
        route.events.entry(event).or_default().push(Arc::new(handler));
        self
    }
}
