//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, addresses parse)
//! - Keep boolean token sets usable (non-empty, disjoint)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("websocket.high_water ({high_water}) must not exceed websocket.outbound_capacity ({capacity})")]
    HighWaterAboveCapacity { high_water: usize, capacity: usize },

    #[error("binder.{0} must list at least one token")]
    EmptyTokens(&'static str),

    #[error("binder token {0:?} is both truthy and falsy")]
    OverlappingToken(String),
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    let ws = &config.websocket;
    if ws.max_frame_bytes == 0 {
        errors.push(ValidationError::Zero { field: "websocket.max_frame_bytes" });
    }
    if ws.outbound_capacity == 0 {
        errors.push(ValidationError::Zero { field: "websocket.outbound_capacity" });
    }
    if ws.high_water > ws.outbound_capacity {
        errors.push(ValidationError::HighWaterAboveCapacity {
            high_water: ws.high_water,
            capacity: ws.outbound_capacity,
        });
    }

    let binder = &config.binder;
    if binder.truthy.is_empty() {
        errors.push(ValidationError::EmptyTokens("truthy"));
    }
    if binder.falsy.is_empty() {
        errors.push(ValidationError::EmptyTokens("falsy"));
    }
    let truthy: HashSet<String> = binder.truthy.iter().map(|t| t.trim().to_lowercase()).collect();
    let mut overlapping: Vec<String> = binder
        .falsy
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| truthy.contains(t))
        .collect();
    overlapping.sort();
    overlapping.dedup();
    errors.extend(overlapping.into_iter().map(ValidationError::OverlappingToken));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
