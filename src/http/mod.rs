//! HTTP surface of the gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, upgrade handler)
//!     → request.rs (request ID, copied into the connection context)
//!     → websocket.rs (per-socket task driving the adapter)
//! ```

pub mod request;
pub mod server;
pub mod websocket;

pub use request::{UuidRequestId, REQUEST_ID_FIELD, X_REQUEST_ID};
pub use server::{AppState, GatewayServer};
