//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::scope::BoolTokens;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Per-socket settings.
    pub websocket: WebSocketConfig,

    /// Parameter binding settings.
    pub binder: BinderConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent sockets; further upgrades get 503 (0 = unlimited).
    pub max_connections: u64,

    /// How long shutdown waits for sockets to close.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            shutdown_grace_secs: 10,
        }
    }
}

/// Per-socket limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Inbound frames above this size are rejected with `InvalidData`.
    pub max_frame_bytes: usize,

    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,

    /// Queue depth above which the next empty queue fires `drain`.
    pub high_water: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024,
            outbound_capacity: 256,
            high_water: 192,
        }
    }
}

/// Token sets used to read booleans from text.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BinderConfig {
    pub truthy: Vec<String>,
    pub falsy: Vec<String>,
}

impl BinderConfig {
    pub fn bool_tokens(&self) -> BoolTokens {
        BoolTokens::new(&self.truthy, &self.falsy)
    }
}

impl Default for BinderConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|w| w.to_string()).collect();
        Self {
            truthy: words(&["true", "1", "yes", "on", "y", "t"]),
            falsy: words(&["false", "0", "no", "off", "n", "f"]),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [binder]
            truthy = ["si"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.listener.max_connections, 10_000);
        assert_eq!(config.websocket, WebSocketConfig::default());
        assert_eq!(config.binder.truthy, ["si"]);
        assert_eq!(config.binder.falsy, BinderConfig::default().falsy);
        assert_eq!(config.binder.bool_tokens().read("SI"), Some(true));
    }

    #[test]
    fn test_default_tokens_match_binder_defaults() {
        assert_eq!(BinderConfig::default().bool_tokens(), BoolTokens::default());
    }
}
