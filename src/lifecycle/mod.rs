//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging + metrics → Bind → Serve
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting upgrades → Close sockets (1001) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then the listener
//! - Ordered shutdown: stop accept, close sockets, wait for them
//! - Shutdown has timeout: sockets still open after the grace period are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownListener};
pub use startup::StartupError;
