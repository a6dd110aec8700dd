//! Event invocation subsystem.
//!
//! # Responsibilities
//! - Wrap a handler body with its parameter binding
//! - Resolve parameters against the cycle's shared cache, then run the body
//! - Turn every failure (binding errors, handler errors, panics) into an [`Outcome`]

pub mod handler;
pub mod outcome;

pub use handler::{EventHandler, IntoReply};
pub use outcome::{HandlerFailure, Outcome, PanicError, ScopeFailure};
