//! Board gateway: WebSocket event routing with typed parameter binding.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │                  BOARD GATEWAY                   │
//!                         │                                                  │
//!   GET /chat/42 upgrade  │  ┌────────┐   ┌─────────┐   ┌─────────────────┐  │
//!   ──────────────────────┼─▶│  http  │──▶│ socket  │──▶│     routing     │  │
//!                         │  │ server │   │ adapter │   │   route table   │  │
//!                         │  └────────┘   └────┬────┘   └─────────────────┘  │
//!                         │                    │                             │
//!   frames                │                    ▼                             │
//!   ◀─────────────────────┼── transport ◀── invoker ◀── scope (binder,      │
//!                         │   + pubsub       handlers    dependencies,      │
//!                         │                              cycle cache)       │
//!                         │                                                  │
//!                         │  config · lifecycle · net · observability        │
//!                         └──────────────────────────────────────────────────┘
//! ```

// Core
pub mod errors;
pub mod invoker;
pub mod routing;
pub mod scope;
pub mod socket;

// Serving
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

// Demo route tables
pub mod board;

pub use config::GatewayConfig;
pub use errors::RegistrationError;
pub use http::GatewayServer;
pub use invoker::{EventHandler, Outcome};
pub use lifecycle::Shutdown;
pub use routing::{EventKey, RouteTable};
pub use socket::{Reply, SocketAdapter};
