//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Resolve the filter from `RUST_LOG`, then config, then the built-in default
//!
//! # Design Decisions
//! - JSON format for production, human-readable format for development
//! - Initialization is idempotent: a second call (tests, embedders) is ignored

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter used when neither `RUST_LOG` nor config sets one.
pub const DEFAULT_FILTER: &str = "board_gateway=debug,tower_http=info";

/// Pick the filter directive: environment first, then config, then default.
pub fn filter_directive(config: &ObservabilityConfig, env: Option<String>) -> String {
    env.filter(|value| !value.trim().is_empty())
        .or_else(|| config.log_filter.clone())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global subscriber. Returns `false` if one was already installed.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let directive = filter_directive(config, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_logs {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    match installed {
        Ok(()) => {
            tracing::debug!(filter = %directive, json = config.json_logs, "Logging initialized");
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        let mut config = ObservabilityConfig::default();
        assert_eq!(filter_directive(&config, None), DEFAULT_FILTER);

        config.log_filter = Some("board_gateway=info".into());
        assert_eq!(filter_directive(&config, None), "board_gateway=info");
        assert_eq!(filter_directive(&config, Some("  ".into())), "board_gateway=info");
        assert_eq!(filter_directive(&config, Some("warn".into())), "warn");
    }

    #[test]
    fn test_second_init_is_ignored() {
        let config = ObservabilityConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
