//! # pointing
//!
//! Planning-poker server binary: loads settings, installs logging, and runs
//! the HTTP/WebSocket server until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pointing_server::{PointingServer, RoomPolicy, ServerConfig};
use pointing_settings::PointingSettings;

/// Planning-poker meeting server.
#[derive(Parser, Debug)]
#[command(name = "pointing", about = "Planning-poker meeting sync server")]
struct Cli {
    /// Settings file (defaults to `~/.pointing/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings and environment).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings and environment).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut PointingSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .config
        .clone()
        .unwrap_or_else(pointing_settings::settings_path);
    let mut settings = pointing_logging::with_bootstrap_subscriber(|| {
        pointing_settings::load_settings_from_path(&settings_path)
    })
    .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    let _ = pointing_logging::init_subscriber(&settings.logging);

    let server = PointingServer::new(
        ServerConfig::from(&settings.server),
        RoomPolicy::from(&settings.room),
    );
    let (addr, handle) = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {}", server.config().bind_address()))?;

    tracing::info!(
        origins = ?settings.server.allowed_origins,
        static_dir = ?settings.server.static_dir,
        "Pointing server listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if server.shutdown().graceful_shutdown(handle, None).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!(
            sessions = server.shutdown().active_sessions(),
            "Shutdown finished with sessions still open"
        );
    }
    Ok(())
}
