//! # relay
//!
//! Relay server binary: loads settings, initialises logging and metrics,
//! and serves the WebSocket relay until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::init_subscriber;
use relay_server::RelayServer;
use relay_server::metrics::install_recorder;
use relay_settings::RelaySettings;

/// Real-time WebSocket message relay.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Real-time WebSocket message relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(relay_settings::settings_path)
    }

    /// Command-line flags win over file and environment values.
    fn apply_overrides(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path();
    let mut settings = relay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply_overrides(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let server = Arc::new(RelayServer::new(settings).with_metrics(metrics));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        pong_wait_ms = server.settings().heartbeat.pong_wait_ms,
        require_login = server.settings().server.require_login,
        "relay listening on ws://{addr}/ws"
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(server.registry(), vec![handle], None)
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_untouched() {
        let cli = Cli::parse_from(["relay"]);
        let mut settings = RelaySettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "relay",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--log-level",
            "debug",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn cli_explicit_settings_path() {
        let cli = Cli::parse_from(["relay", "--settings", "/etc/relay.json"]);
        assert_eq!(cli.settings_path(), PathBuf::from("/etc/relay.json"));
    }

    #[test]
    fn cli_default_settings_path() {
        let cli = Cli::parse_from(["relay"]);
        assert!(cli.settings_path().ends_with(".relay/settings.json"));
    }

    #[test]
    fn cli_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["relay", "--port", "70000"]).is_err());
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let mut settings = RelaySettings::default();
        settings.server.port = 0;
        let server = RelayServer::new(settings);
        let (_, handle) = server.listen().await.unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            server
                .shutdown()
                .graceful_shutdown(server.registry(), vec![handle], None),
        )
        .await
        .expect("shutdown timed out");
        assert!(server.shutdown().is_shutting_down());
    }
}
