//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_connections_active` (gauge): live sockets
//! - `gateway_connections_total` (counter): accepted upgrades
//! - `gateway_upgrades_rejected_total` (counter): refused upgrades by reason
//! - `gateway_dispatch_total` (counter): handler runs by event, outcome
//! - `gateway_dispatch_duration_seconds` (histogram): one dispatch cycle, by event
//! - `gateway_wire_errors_total` (counter): error frames by code
//! - `gateway_frames_dropped_total` (counter): frames lost to a full outbound queue
//! - `gateway_published_frames_total` (counter): frames delivered through topics
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every update is a no-op (tests, embedders)
//! - Event labels only come from registered events, so cardinality stays bounded

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
pub const UPGRADES_REJECTED_TOTAL: &str = "gateway_upgrades_rejected_total";
pub const DISPATCH_TOTAL: &str = "gateway_dispatch_total";
pub const DISPATCH_DURATION_SECONDS: &str = "gateway_dispatch_duration_seconds";
pub const WIRE_ERRORS_TOTAL: &str = "gateway_wire_errors_total";
pub const FRAMES_DROPPED_TOTAL: &str = "gateway_frames_dropped_total";
pub const PUBLISHED_FRAMES_TOTAL: &str = "gateway_published_frames_total";

/// Install the global Prometheus recorder and serve it on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a refused upgrade.
pub fn record_rejected_upgrade(reason: &'static str) {
    metrics::counter!(UPGRADES_REJECTED_TOTAL, "reason" => reason).increment(1);
}
