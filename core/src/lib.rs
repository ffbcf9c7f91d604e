//! Core functionality for the intake project
//!
//! This crate contains the ingest engine: the durable append log, the
//! per-connection sessions, the TCP listener, and the supervisor that
//! ties their lifecycles together. The `intaked` binary is a thin
//! wrapper around [`Supervisor`].

pub mod applog;
pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod session;
pub mod supervisor;

pub use applog::{AppendLog, LogReader, LogRecord};
pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use events::{EventSeverity, IngestEvent, ServerState};
pub use listener::Listener;
pub use session::{ConnectionSession, SessionOutcome, SessionState};
pub use supervisor::{Supervisor, SupervisorHandle};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| {
                crate::IngestError::Config(format!("Failed to initialize tracing: {}", e))
            })?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
