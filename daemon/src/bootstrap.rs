//! Daemon bootstrap: configuration resolution, supervisor wiring, and
//! graceful shutdown
//!
//! This module turns a config file plus CLI overrides into a validated
//! [`IngestConfig`], spawns the supervisor, and installs Ctrl+C handling
//! so the server drains instead of dying mid-write.

use crate::{DaemonError, Result};
use intake_core::config::load_config_from_toml_path;
use intake_core::{IngestConfig, Supervisor, SupervisorHandle};
use std::path::{Path, PathBuf};
use tracing::info;

/// Build the effective configuration: file values (or defaults when no
/// file is given), then CLI overrides, then validation.
pub fn resolve_config(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
    log_path: Option<PathBuf>,
) -> Result<IngestConfig> {
    let mut config = match config_path {
        Some(path) => load_config_from_toml_path(path)?,
        None => IngestConfig::default(),
    };

    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(log_path) = log_path {
        config.log_path = log_path;
    }

    config.validate()?;
    Ok(config)
}

/// Run the ingest server until shutdown.
///
/// Spawns a task that forwards Ctrl+C to the supervisor handle, then
/// drives the supervisor to completion. Returns when the server has
/// fully stopped (log closed, sessions drained).
pub async fn run(config: IngestConfig) -> Result<()> {
    let supervisor = Supervisor::new(config);
    let handle = supervisor.handle();

    spawn_signal_task(handle);

    supervisor.run().await.map_err(DaemonError::from)
}

fn spawn_signal_task(handle: SupervisorHandle) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
        handle.shutdown();
    });
}
