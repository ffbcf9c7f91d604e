//! Simple daemon error types

use intake_core::IngestError;

#[derive(Debug)]
pub enum DaemonError {
    ConfigError(String),
    IngestError(IngestError),
    IoError(std::io::Error),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            DaemonError::IngestError(err) => write!(f, "Ingest error: {}", err),
            DaemonError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<IngestError> for DaemonError {
    fn from(err: IngestError) -> Self {
        DaemonError::IngestError(err)
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        DaemonError::IoError(err)
    }
}

impl DaemonError {
    /// Process exit code for this error: 2 for configuration problems,
    /// 3 for bind/listener failures, 4 for storage and I/O failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::ConfigError(_) => 2,
            DaemonError::IngestError(err) => match err {
                IngestError::Config(_) => 2,
                IngestError::Bind { .. } | IngestError::Listener(_) => 3,
                IngestError::Storage { .. } | IngestError::Io(_) => 4,
            },
            DaemonError::IoError(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
