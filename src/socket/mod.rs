//! WebSocket lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP upgrade (path)
//!     → adapter.rs (route match → ConnectionContext stored as user data)
//! socket callbacks (open / message / close / drain / subscription)
//!     → context.rs (shape check of stored user data)
//!     → wire.rs (frame decode, reply and error frames)
//!     → invoker (handlers, one resolution cache per cycle)
//!     → transport.rs (outbound queue, pubsub.rs for topics)
//! ```

pub mod adapter;
pub mod context;
pub mod pubsub;
pub mod testing;
pub mod transport;
pub mod wire;

pub use adapter::{DispatchReport, SocketAdapter, DEFAULT_MAX_FRAME_BYTES};
pub use context::{ConnectionContext, ContextError};
pub use pubsub::TopicHub;
pub use transport::{Backlog, ChannelTransport, ConnectionHandle, Outbound, Outlet, Signal, Transport};
pub use wire::{parse_frame, ErrorCode, ErrorFrame, FrameError, InboundMessage, Reply};
