//! Result of running one handler.

use std::error::Error as StdError;

use thiserror::Error;
use tower::BoxError;

use crate::routing::EventKey;
use crate::scope::ScopeError;
use crate::socket::wire::{ErrorCode, Reply};

/// A parameter could not be bound; the handler body never ran.
#[derive(Debug)]
pub struct ScopeFailure {
    pub route: String,
    pub event: EventKey,
    pub handler: String,
    pub param: String,
    pub error: ScopeError,
}

/// The handler body returned an error or panicked.
#[derive(Debug)]
pub struct HandlerFailure {
    pub route: String,
    pub event: EventKey,
    pub handler: String,
    pub error: BoxError,
    /// The error followed by its source chain, one cause per line.
    pub trace: String,
}

/// A handler panicked instead of returning.
#[derive(Debug, Error)]
#[error("handler panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

#[derive(Debug)]
pub enum Outcome {
    /// Success without a reply.
    None,
    Reply(Reply),
    ScopeFailure(ScopeFailure),
    HandlerFailure(HandlerFailure),
}

impl Outcome {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Reply(_) => "reply",
            Self::ScopeFailure(_) => "scope_failure",
            Self::HandlerFailure(_) => "handler_failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ScopeFailure(_) | Self::HandlerFailure(_))
    }

    /// Code and message reported to the client, if this outcome is a failure.
    pub fn wire_error(&self) -> Option<(ErrorCode, String)> {
        match self {
            Self::ScopeFailure(failure) => Some((ErrorCode::InvalidData, failure.error.to_string())),
            Self::HandlerFailure(failure) => Some((ErrorCode::ServerError, failure.error.to_string())),
            Self::None | Self::Reply(_) => None,
        }
    }
}

/// Render an error and every `source()` below it.
pub(crate) fn format_trace(error: &(dyn StdError + 'static)) -> String {
    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str("\n  caused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("could not move card")]
    struct MoveError(#[source] std::io::Error);

    #[test]
    fn test_trace_walks_source_chain() {
        let err = MoveError(std::io::Error::other("disk full"));
        assert_eq!(format_trace(&err), "could not move card\n  caused by: disk full");
    }

    #[test]
    fn test_failure_codes() {
        let failure = Outcome::HandlerFailure(HandlerFailure {
            route: "/r".into(),
            event: EventKey::message("x"),
            handler: "h".into(),
            error: "boom".into(),
            trace: "boom".into(),
        });
        assert_eq!(failure.wire_error(), Some((ErrorCode::ServerError, "boom".to_string())));
        assert_eq!(failure.label(), "handler_failure");
        assert!(Outcome::None.wire_error().is_none());
    }
}
