//! rews - interactive resilient WebSocket client.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Resilient WebSocket client: prints inbound events, sends stdin lines.
#[derive(Parser, Debug)]
#[command(name = "rews", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "REWS_CONFIG", default_value = "config/default.toml")]
    config: String,

    /// Endpoint URL, overriding `socket.url` from the config file
    #[arg(short, long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    rews_telemetry::init_logging()?;

    info!("Starting rews v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let mut config = rews_cli::AppConfig::from_file(&args.config)?;
    if let Some(url) = args.url {
        config = config.with_url(url);
    }
    info!(
        url = %config.socket.url,
        heartbeat = config.socket.heartbeat_enabled,
        reconnect_limit = ?config.socket.reconnect_limit,
        "Configuration loaded"
    );

    let app = rews_cli::Application::new(config)?;
    app.run().await?;

    Ok(())
}
