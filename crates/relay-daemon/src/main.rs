//! # relayd
//!
//! Loads settings, starts the relay server, and runs until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::{init_subscriber, init_subscriber_with_file};
use relay_server::{RelayServer, ServerConfig};
use relay_settings::{LoggingSettings, RelaySettings};

/// WebSocket broadcast relay.
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about = "WebSocket broadcast relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Load settings from the chosen file plus env, then apply flags.
    fn resolve_settings(&self) -> Result<RelaySettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(relay_settings::settings_path);
        let mut settings = relay_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

/// Install the global subscriber; stderr always, plus `logging.file` when set.
fn init_logging(logging: &LoggingSettings) -> Result<()> {
    match &logging.file {
        Some(path) => init_subscriber_with_file(&logging.level, logging.format, path)
            .with_context(|| format!("Failed to open log file {}", path.display())),
        None => {
            init_subscriber(&logging.level, logging.format);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // .env must be loaded before settings read RELAY_* overrides
    let dotenv = dotenvy::dotenv().ok();

    let settings = args.resolve_settings()?;
    init_logging(&settings.logging)?;
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let config = ServerConfig::from(&settings.server);
    let shutdown_timeout = config.shutdown_timeout;
    let server = RelayServer::new(config).with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        mailbox_capacity = settings.server.mailbox_capacity,
        max_connections = settings.server.max_connections,
        "relay listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(vec![handle], shutdown_timeout)
        .await;
    let closed = server.hub().close_all();
    tracing::info!(drained, closed, "Shutdown complete");
    Ok(())
}
