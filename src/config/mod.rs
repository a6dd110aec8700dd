//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! --config flag or GATEWAY_CONFIG (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → startup builds the adapter, tracker and server from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, resolve_config_path, ConfigError, CONFIG_ENV};
pub use schema::{BinderConfig, GatewayConfig, ListenerConfig, ObservabilityConfig, WebSocketConfig};
pub use validation::{validate_config, ValidationError};
