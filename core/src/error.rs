//! Ingest error types and utilities

use thiserror::Error;

/// Errors produced by the ingest engine
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener failure: {0}")]
    Listener(String),

    #[error("Storage error on {path}: {message}")]
    Storage { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Get the stable error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Config(_) => "ING001",
            IngestError::Bind { .. } => "ING002",
            IngestError::Listener(_) => "ING003",
            IngestError::Storage { .. } => "ING004",
            IngestError::Io(_) => "ING005",
        }
    }

    /// Whether this error is fatal to the whole process.
    ///
    /// Per-connection read and append failures are surfaced to the owning
    /// session only; everything reaching the supervisor through this type
    /// is fatal except plain I/O passthrough, which depends on context.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Config(_)
                | IngestError::Bind { .. }
                | IngestError::Listener(_)
                | IngestError::Storage { .. }
        )
    }

    /// Build a storage error carrying the log path for context
    pub fn storage(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        IngestError::Storage {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type used throughout the ingest engine
pub type Result<T> = std::result::Result<T, IngestError>;
