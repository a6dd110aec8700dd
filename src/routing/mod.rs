//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request path
//!     → table.rs (first route whose pattern matches, in registration order)
//!     → pattern.rs (segment-by-segment match, placeholder extraction)
//!     → Return: RouteMatch (handlers by event + route data) or no match
//!
//! Table assembly (at startup):
//!     register / route builder / merge
//!     → compile patterns, reject placeholder-name conflicts
//!     → share as Arc<RouteTable>, immutable from then on
//! ```
//!
//! # Design Decisions
//! - Whole-segment placeholders only (`{name}` or `:name`), no regex
//! - Deterministic: same path always matches the same route
//! - Conflicts are registration errors, never request-time errors

pub mod pattern;
pub mod table;

pub use pattern::{RouteData, RoutePattern};
pub use table::{EventKey, Route, RouteBuilder, RouteMatch, RouteTable};
