//! Event system for the intake server
//!
//! This module defines the event types emitted by the ingest engine to
//! provide observability into connection lifecycle and log milestones.
//!
//! Events are designed to be serializable and can be:
//! - Logged to structured log files
//! - Sent to monitoring systems
//! - Broadcast to multiple subscribers via event channels

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Lifecycle state of the ingest server, published via a watch channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ServerState {
    /// Log and listener are being opened
    Starting,
    /// Listener is accepting connections
    Running,
    /// No new connections admitted; in-flight sessions finishing
    Draining,
    /// Log is closed and all sessions have reached a terminal state
    Stopped,
}

impl ServerState {
    /// Whether the server is accepting connections
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Running)
    }

    /// Whether the server has fully stopped
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServerState::Stopped)
    }
}

/// Severity level of an event, for filtering and log-level mapping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted by the ingest engine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum IngestEvent {
    /// A connection was accepted and a session started
    ConnectionOpened {
        /// Connection identifier assigned at accept time
        connection_id: u64,
        /// Remote peer address
        peer_addr: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A chunk was durably handed to the append log
    RecordAppended {
        /// Connection identifier
        connection_id: u64,
        /// Global sequence number assigned to the record
        sequence: u64,
        /// Payload length in bytes
        len: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A session ended normally on EOF
    ConnectionClosed {
        /// Connection identifier
        connection_id: u64,
        /// Total bytes read from the connection
        bytes_read: u64,
        /// Number of records appended for this connection
        records: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A session ended on a read or append error
    ConnectionFailed {
        /// Connection identifier
        connection_id: u64,
        /// Description of the failure
        reason: String,
        /// Total bytes read from the connection before the failure
        bytes_read: u64,
        /// Number of records appended for this connection
        records: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A connection was closed at accept because the session limit was reached
    ConnectionRejected {
        /// Connection identifier
        connection_id: u64,
        /// Remote peer address
        peer_addr: String,
        /// Sessions active at the time of rejection
        active_sessions: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// Shutdown began; the listener stopped accepting
    Draining {
        /// Sessions still in flight when the drain began
        active_sessions: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// The append log was flushed and closed
    LogClosed {
        /// Next sequence number that would have been assigned
        next_sequence: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },
}

impl IngestEvent {
    /// Get the severity level for this event
    #[must_use]
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::ConnectionOpened { .. }
            | Self::ConnectionClosed { .. }
            | Self::Draining { .. }
            | Self::LogClosed { .. } => EventSeverity::Info,
            Self::RecordAppended { .. } => EventSeverity::Debug,
            Self::ConnectionFailed { .. } | Self::ConnectionRejected { .. } => {
                EventSeverity::Warning
            }
        }
    }

    /// The connection this event concerns, if any
    #[must_use]
    pub fn connection_id(&self) -> Option<u64> {
        match self {
            Self::ConnectionOpened { connection_id, .. }
            | Self::RecordAppended { connection_id, .. }
            | Self::ConnectionClosed { connection_id, .. }
            | Self::ConnectionFailed { connection_id, .. }
            | Self::ConnectionRejected { connection_id, .. } => Some(*connection_id),
            Self::Draining { .. } | Self::LogClosed { .. } => None,
        }
    }

    /// Create a current timestamp string in RFC3339 format
    /// (YYYY-MM-DDTHH:MM:SSZ)
    #[must_use]
    pub fn current_timestamp() -> String {
        humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
    }

    /// Create a connection opened event
    #[must_use]
    pub fn connection_opened(connection_id: u64, peer_addr: String) -> Self {
        Self::ConnectionOpened {
            connection_id,
            peer_addr,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a record appended event
    #[must_use]
    pub fn record_appended(connection_id: u64, sequence: u64, len: u64) -> Self {
        Self::RecordAppended {
            connection_id,
            sequence,
            len,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a connection closed event
    #[must_use]
    pub fn connection_closed(connection_id: u64, bytes_read: u64, records: u64) -> Self {
        Self::ConnectionClosed {
            connection_id,
            bytes_read,
            records,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a connection failed event
    #[must_use]
    pub fn connection_failed(
        connection_id: u64,
        reason: String,
        bytes_read: u64,
        records: u64,
    ) -> Self {
        Self::ConnectionFailed {
            connection_id,
            reason,
            bytes_read,
            records,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a connection rejected event
    #[must_use]
    pub fn connection_rejected(connection_id: u64, peer_addr: String, active_sessions: u64) -> Self {
        Self::ConnectionRejected {
            connection_id,
            peer_addr,
            active_sessions,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a draining event
    #[must_use]
    pub fn draining(active_sessions: u64) -> Self {
        Self::Draining {
            active_sessions,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a log closed event
    #[must_use]
    pub fn log_closed(next_sequence: u64) -> Self {
        Self::LogClosed {
            next_sequence,
            timestamp: Self::current_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping() {
        assert_eq!(
            IngestEvent::connection_opened(1, "127.0.0.1:9".to_string()).severity(),
            EventSeverity::Info
        );
        assert_eq!(
            IngestEvent::record_appended(1, 0, 5).severity(),
            EventSeverity::Debug
        );
        assert_eq!(
            IngestEvent::connection_failed(1, "broken pipe".to_string(), 0, 0).severity(),
            EventSeverity::Warning
        );
        assert_eq!(
            IngestEvent::connection_rejected(1, "127.0.0.1:9".to_string(), 8).severity(),
            EventSeverity::Warning
        );
        assert_eq!(IngestEvent::draining(3).severity(), EventSeverity::Info);
    }

    #[test]
    fn connection_id_extraction() {
        assert_eq!(
            IngestEvent::connection_closed(7, 10, 2).connection_id(),
            Some(7)
        );
        assert_eq!(IngestEvent::log_closed(42).connection_id(), None);
    }

    #[test]
    fn timestamp_is_rfc3339_shaped() {
        let ts = IngestEvent::current_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn json_roundtrip() {
        let event = IngestEvent::connection_failed(3, "connection reset".to_string(), 128, 2);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"eventType\":\"connectionFailed\""));
        let back: IngestEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn server_state_predicates() {
        assert!(ServerState::Running.is_running());
        assert!(!ServerState::Draining.is_running());
        assert!(ServerState::Stopped.is_stopped());
        assert!(!ServerState::Starting.is_stopped());
    }
}
