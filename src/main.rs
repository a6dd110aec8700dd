//! board-gateway: serves the demo board over WebSockets.
//!
//! Configuration comes from `--config <file>` or `GATEWAY_CONFIG`; without
//! either, built-in defaults apply.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use board_gateway::board::{self, BoardStore};
use board_gateway::config::{load_or_default, resolve_config_path, CONFIG_ENV};
use board_gateway::lifecycle::startup;

#[derive(Parser)]
#[command(name = "board-gateway", version, about = "WebSocket gateway for the demo board")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = resolve_config_path(cli.config, std::env::var(CONFIG_ENV).ok());
    let config = load_or_default(path.as_deref())?;

    startup::init_observability(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?path,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        "board-gateway starting"
    );

    let table = board::board_routes(Arc::new(BoardStore::default()))?;
    startup::run(config, table).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
