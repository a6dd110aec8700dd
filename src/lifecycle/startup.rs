//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and the metrics exporter from configuration
//! - Bind the listener and run the server until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener starts last (traffic only when ready)

use std::io;
use std::net::{AddrParseError, SocketAddr};

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{ConfigError, GatewayConfig, ListenerConfig, ObservabilityConfig};
use crate::errors::RegistrationError;
use crate::http::GatewayServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::{logging, metrics};
use crate::routing::RouteTable;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("route registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("invalid metrics address {address:?}: {source}")]
    MetricsAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },

    #[error("cannot start metrics exporter: {0}")]
    Metrics(#[from] BuildError),

    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

/// Install logging and, when enabled, the Prometheus exporter.
pub fn init_observability(config: &ObservabilityConfig) -> Result<(), StartupError> {
    logging::init_logging(config);

    if config.metrics_enabled {
        let addr: SocketAddr = config
            .metrics_address
            .parse()
            .map_err(|source| StartupError::MetricsAddress {
                address: config.metrics_address.clone(),
                source,
            })?;
        metrics::init_metrics(addr)?;
    }
    Ok(())
}

pub async fn bind(config: &ListenerConfig) -> Result<TcpListener, StartupError> {
    TcpListener::bind(&config.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.bind_address.clone(),
            source,
        })
}

/// Serve `table` until SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig, table: RouteTable) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let listener = bind(&config.listener).await?;
    let local_addr = listener.local_addr().map_err(StartupError::Serve)?;
    tracing::info!(
        address = %local_addr,
        routes = table.len(),
        max_connections = config.listener.max_connections,
        "Listening for connections"
    );

    GatewayServer::new(&config, table, shutdown)
        .run(listener)
        .await
        .map_err(StartupError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ListenerConfig {
            bind_address: taken.local_addr().unwrap().to_string(),
            ..ListenerConfig::default()
        };
        let err = bind(&config).await.unwrap_err();
        assert!(err.to_string().starts_with(&format!("cannot bind {}", config.bind_address)));
    }

    #[test]
    fn test_bad_metrics_address_rejected() {
        let config = ObservabilityConfig {
            metrics_enabled: true,
            metrics_address: "not-an-address".into(),
            ..ObservabilityConfig::default()
        };
        assert!(matches!(
            init_observability(&config),
            Err(StartupError::MetricsAddress { .. })
        ));
    }
}
