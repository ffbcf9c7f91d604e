//! Per-connection ingest session
//!
//! A [`ConnectionSession`] owns one accepted connection and streams its
//! bytes into the shared [`AppendLog`], one record per chunk read. The
//! session is the only owner of its socket; every exit path releases it
//! exactly once via drop.
//!
//! State machine: `Active -> {Active (chunk appended), Closed (EOF),
//! Failed (read or append error)}`. No session error is fatal to the
//! process; failures terminate only this session.

use crate::applog::AppendLog;
use crate::events::IngestEvent;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Lifecycle state of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading chunks and appending them
    Active,
    /// Peer closed the stream; ended normally
    Closed,
    /// Read or append error; ended abnormally
    Failed,
}

/// Terminal summary of a session, reported to the listener's join set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Connection identifier assigned at accept time
    pub connection_id: u64,
    /// Terminal state (`Closed` or `Failed`)
    pub state: SessionState,
    /// Total bytes read from the connection
    pub bytes_read: u64,
    /// Records appended on behalf of this connection
    pub records: u64,
}

/// One accepted client connection being drained into the append log.
///
/// Generic over the stream type so tests can drive it with in-memory
/// duplex pipes; the listener instantiates it with `TcpStream`.
pub struct ConnectionSession<S> {
    connection_id: u64,
    stream: S,
    log: Arc<AppendLog>,
    chunk_size: usize,
    event_tx: broadcast::Sender<IngestEvent>,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + Unpin,
{
    /// Create a session for an accepted connection
    pub fn new(
        connection_id: u64,
        stream: S,
        log: Arc<AppendLog>,
        chunk_size: usize,
        event_tx: broadcast::Sender<IngestEvent>,
    ) -> Self {
        Self {
            connection_id,
            stream,
            log,
            chunk_size,
            event_tx,
        }
    }

    /// Drive the session to a terminal state.
    ///
    /// Reads up to `chunk_size` bytes at a time; a zero-length read (EOF)
    /// ends the session as `Closed`, a read or append error as `Failed`.
    /// The append log is flushed once the session reaches a terminal
    /// state, honoring the flush-per-connection-close policy.
    pub async fn run(mut self) -> SessionOutcome {
        let mut buf = vec![0u8; self.chunk_size];
        let mut bytes_read = 0u64;
        let mut records = 0u64;
        let mut failure: Option<String> = None;

        let state = loop {
            match self.stream.read(&mut buf).await {
                Ok(0) => {
                    debug!("Connection {} reached EOF", self.connection_id);
                    break SessionState::Closed;
                }
                Ok(n) => {
                    bytes_read += n as u64;
                    match self.log.append(self.connection_id, &buf[..n]).await {
                        Ok(sequence) => {
                            records += 1;
                            let _ = self.event_tx.send(IngestEvent::record_appended(
                                self.connection_id,
                                sequence,
                                n as u64,
                            ));
                        }
                        Err(e) => {
                            warn!(
                                "Append failed for connection {}: {}",
                                self.connection_id, e
                            );
                            failure = Some(e.to_string());
                            break SessionState::Failed;
                        }
                    }
                }
                Err(e) => {
                    warn!("Read failed on connection {}: {}", self.connection_id, e);
                    failure = Some(e.to_string());
                    break SessionState::Failed;
                }
            }
        };

        // Flush policy: flush whenever an accepted connection ends.
        if let Err(e) = self.log.flush().await {
            warn!(
                "Flush after connection {} failed: {}",
                self.connection_id, e
            );
        }

        let event = match state {
            SessionState::Failed => IngestEvent::connection_failed(
                self.connection_id,
                failure.unwrap_or_else(|| "unknown".to_string()),
                bytes_read,
                records,
            ),
            _ => IngestEvent::connection_closed(self.connection_id, bytes_read, records),
        };
        let _ = self.event_tx.send(event);

        SessionOutcome {
            connection_id: self.connection_id,
            state,
            bytes_read,
            records,
        }
        // `self.stream` drops here, releasing the socket.
    }
}
