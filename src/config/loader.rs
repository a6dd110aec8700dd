//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GATEWAY_CONFIG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: GatewayConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// The config file to use: the CLI flag wins over [`CONFIG_ENV`].
pub fn resolve_config_path(cli: Option<PathBuf>, env: Option<String>) -> Option<PathBuf> {
    cli.or_else(|| env.filter(|value| !value.is_empty()).map(PathBuf::from))
}

/// Load `path` if given, otherwise validated defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = GatewayConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("board-gateway-{}-{name}.toml", std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_valid_file() {
        let path = write_temp("valid", "[websocket]\nmax_frame_bytes = 1024\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.websocket.max_frame_bytes, 1024);
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_errors_name_the_file() {
        let missing = PathBuf::from("/definitely/not/here.toml");
        let err = load_config(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.toml"));

        let path = write_temp("broken", "[listener\n");
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let path = write_temp("invalid", "[websocket]\noutbound_capacity = 0\nhigh_water = 0\nmax_frame_bytes = 0\n");
        let err = load_config(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed: websocket.max_frame_bytes must be greater than zero, \
             websocket.outbound_capacity must be greater than zero"
        );
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_cli_flag_beats_env() {
        let cli = Some(PathBuf::from("cli.toml"));
        assert_eq!(resolve_config_path(cli, Some("env.toml".into())), Some(PathBuf::from("cli.toml")));
        assert_eq!(resolve_config_path(None, Some("env.toml".into())), Some(PathBuf::from("env.toml")));
        assert_eq!(resolve_config_path(None, Some(String::new())), None);
    }
}
