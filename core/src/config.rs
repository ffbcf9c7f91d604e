//! Configuration loading and validation for the intake daemon
//!
//! This module parses a TOML configuration into an [`IngestConfig`],
//! applies sane defaults via serde so an empty file works, and performs
//! strict validation with field-path error messages.

use crate::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on a single read chunk; anything larger would exceed the
/// maximum record size the append log accepts.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Configuration for the ingest server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestConfig {
    /// Host address to bind the listener to
    pub host: String,

    /// Port to bind the listener to
    pub port: u16,

    /// Path of the append-only log file
    pub log_path: PathBuf,

    /// Maximum number of bytes read from a connection per chunk
    pub chunk_size: usize,

    /// Maximum number of concurrently serviced sessions; unbounded when
    /// absent. Excess connections are closed at accept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,

    /// Maximum time to wait for in-flight sessions to finish at shutdown
    pub grace_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4650,
            log_path: PathBuf::from("intake.log"),
            chunk_size: 8 * 1024,
            max_sessions: None,
            grace_timeout_secs: 10,
        }
    }
}

impl IngestConfig {
    /// The listener bind address as `host:port`
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the drain grace timeout as a Duration
    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }

    /// Validate the configuration and return `Result<()>` with field-path errors
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(IngestError::Config("host: cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(IngestError::Config("port: must be 1..=65535".to_string()));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(IngestError::Config("logPath: cannot be empty".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(IngestError::Config("chunkSize: must be > 0".to_string()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(IngestError::Config(format!(
                "chunkSize: must be <= {} bytes",
                MAX_CHUNK_SIZE
            )));
        }
        if self.max_sessions == Some(0) {
            return Err(IngestError::Config(
                "maxSessions: must be > 0 when set".to_string(),
            ));
        }
        if self.grace_timeout_secs == 0 {
            return Err(IngestError::Config(
                "graceTimeoutSecs: must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load an ingest configuration from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<IngestConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        IngestError::Config(format!(
            "Failed to read config {:?}: {}",
            path.as_ref(),
            e
        ))
    })?;
    load_config_from_toml_str(&data)
}

/// Load an ingest configuration from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<IngestConfig> {
    let cfg: IngestConfig = toml::from_str(input)
        .map_err(|e| IngestError::Config(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}
