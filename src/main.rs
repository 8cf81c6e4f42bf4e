//! # tether
//!
//! Durable WebSocket session server. Loads layered settings, installs
//! logging and metrics, and serves `/ws`, `/health` and `/metrics` until
//! interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_server::{EchoHandler, ServerConfig, TetherServer};
use tether_settings::{load_settings_from_path, settings_path, LogFormat};
use tether_telemetry::{init_telemetry, install_metrics_recorder, parse_level, TelemetryConfig};

/// Tether WebSocket session server.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Durable WebSocket session server")]
struct Cli {
    /// Settings file (defaults to ~/.tether/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let log_level = match args.log_level.as_deref() {
        Some(name) => parse_level(name).with_context(|| format!("invalid log level: {name}"))?,
        None => parse_level(settings.logging.level.as_filter_str()).unwrap_or(tracing::Level::INFO),
    };
    init_telemetry(&TelemetryConfig {
        log_level,
        module_levels: Vec::new(),
        json: settings.logging.format == LogFormat::Json,
    })
    .context("failed to install tracing subscriber")?;

    let metrics = install_metrics_recorder().context("failed to install metrics recorder")?;

    let server = TetherServer::new(ServerConfig::from_settings(&settings), Arc::new(EchoHandler))
        .with_metrics(metrics);
    let handle = server
        .listen()
        .await
        .with_context(|| format!("failed to bind {}:{}", settings.server.host, settings.server.port))?;
    tracing::info!(
        port = handle.port(),
        settings = %path.display(),
        reconnect_timeout_ms = settings.socket.reconnect_timeout_ms,
        "tether ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
