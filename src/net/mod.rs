//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → connection.rs (slot reserved in ConnectionTracker, 503 when full)
//!     → socket task (ConnectionState: Upgrading → Open → Closed)
//!     → guard dropped, slot released
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - Connection IDs are process-unique and only used for tracing

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker, InvalidTransition};
