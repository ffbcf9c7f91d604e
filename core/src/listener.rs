//! TCP listener: accept loop, session dispatch, and drain
//!
//! The [`Listener`] owns the bound socket for the life of the process.
//! Each accepted connection is handed a fresh connection id and spawned
//! as its own tokio task, tracked in a [`JoinSet`] so shutdown can wait
//! for in-flight sessions. Accepting never blocks on any session's I/O.
//!
//! Accept errors are split two ways: transient per-connection conditions
//! are logged and the loop continues; anything else means the listening
//! socket itself is broken and surfaces as a fatal `Listener` error.

use crate::applog::AppendLog;
use crate::config::IngestConfig;
use crate::events::IngestEvent;
use crate::session::{ConnectionSession, SessionOutcome, SessionState};
use crate::{IngestError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The accept side of the ingest server
pub struct Listener {
    inner: TcpListener,
    next_connection_id: u64,
    sessions: JoinSet<SessionOutcome>,
}

impl Listener {
    /// Bind the listening socket.
    ///
    /// # Errors
    /// Returns a `Bind` error when the address is already in use or
    /// invalid.
    pub async fn bind(addr: &str) -> Result<Listener> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| IngestError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        if let Ok(local) = inner.local_addr() {
            info!("Listening on {}", local);
        }
        Ok(Listener {
            inner,
            next_connection_id: 0,
            sessions: JoinSet::new(),
        })
    }

    /// The locally bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(IngestError::Io)
    }

    /// Sessions currently tracked (in flight or finished but unreaped)
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections until the shutdown watch flips to `true`.
    ///
    /// Returns `Ok(())` on shutdown. Transient accept errors are logged
    /// and retried; a broken listening socket returns a fatal `Listener`
    /// error. In-flight sessions keep running either way; the caller
    /// drains them via [`drain`](Self::drain).
    pub async fn accept_loop(
        &mut self,
        log: Arc<AppendLog>,
        config: &IngestConfig,
        event_tx: broadcast::Sender<IngestEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.dispatch(stream, peer, &log, config, &event_tx);
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!("Transient accept error, retrying: {}", e);
                    }
                    Err(e) => {
                        error!("Listening socket failed: {}", e);
                        return Err(IngestError::Listener(e.to_string()));
                    }
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signaled; listener stops accepting");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Start a session for an accepted connection, or reject it when the
    /// session limit is reached.
    fn dispatch(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        log: &Arc<AppendLog>,
        config: &IngestConfig,
        event_tx: &broadcast::Sender<IngestEvent>,
    ) {
        // Reap finished sessions so the active count stays accurate.
        while let Some(joined) = self.sessions.try_join_next() {
            log_session_outcome(joined);
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        if let Some(max) = config.max_sessions {
            if self.sessions.len() >= max {
                warn!(
                    "Rejecting connection {} from {}: {} session(s) active (limit {})",
                    connection_id,
                    peer,
                    self.sessions.len(),
                    max
                );
                let _ = event_tx.send(IngestEvent::connection_rejected(
                    connection_id,
                    peer.to_string(),
                    self.sessions.len() as u64,
                ));
                drop(stream);
                return;
            }
        }

        info!("Connection {} accepted from {}", connection_id, peer);
        let _ = event_tx.send(IngestEvent::connection_opened(connection_id, peer.to_string()));

        let session = ConnectionSession::new(
            connection_id,
            stream,
            Arc::clone(log),
            config.chunk_size,
            event_tx.clone(),
        );
        self.sessions.spawn(session.run());
    }

    /// Wait for in-flight sessions to reach a terminal state, bounded by
    /// `grace`. Sessions still running when the timeout elapses are
    /// aborted. Returns the number of aborted sessions.
    pub async fn drain(mut self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, self.sessions.join_next()).await {
                Ok(Some(joined)) => log_session_outcome(joined),
                Ok(None) => return 0,
                Err(_) => {
                    let aborted = self.sessions.len();
                    warn!("Drain grace timeout elapsed; aborting {} session(s)", aborted);
                    self.sessions.abort_all();
                    while self.sessions.join_next().await.is_some() {}
                    return aborted;
                }
            }
        }
    }
}

fn log_session_outcome(joined: std::result::Result<SessionOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => match outcome.state {
            SessionState::Closed => debug!(
                "Connection {} closed ({} bytes, {} records)",
                outcome.connection_id, outcome.bytes_read, outcome.records
            ),
            // The session already logged the failure with its reason.
            SessionState::Failed => debug!(
                "Connection {} failed after {} bytes",
                outcome.connection_id, outcome.bytes_read
            ),
            SessionState::Active => error!(
                "Connection {} task finished while still active",
                outcome.connection_id
            ),
        },
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("Session task panicked: {}", e),
    }
}

/// Accept errors that concern the just-attempted connection rather than
/// the listening socket itself.
fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applog::LogReader;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tempfile::tempdir;

    fn test_config() -> IngestConfig {
        IngestConfig {
            chunk_size: 1024,
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn bind_fails_with_bind_error_when_address_in_use() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = holder.local_addr().unwrap();

        let err = Listener::bind(&addr.to_string()).await.unwrap_err();
        assert_eq!(err.code(), "ING002");
        assert!(matches!(err, IngestError::Bind { .. }));
    }

    #[tokio::test]
    async fn bind_fails_on_invalid_address() {
        let err = Listener::bind("definitely-not-an-address").await.unwrap_err();
        assert!(matches!(err, IngestError::Bind { .. }));
    }

    #[test]
    fn transient_accept_error_classification() {
        use std::io::{Error, ErrorKind};
        assert!(is_transient_accept_error(&Error::new(
            ErrorKind::ConnectionAborted,
            "aborted"
        )));
        assert!(is_transient_accept_error(&Error::new(
            ErrorKind::Interrupted,
            "eintr"
        )));
        assert!(!is_transient_accept_error(&Error::new(
            ErrorKind::InvalidInput,
            "bad fd"
        )));
    }

    #[tokio::test]
    async fn accepts_ingests_and_drains() {
        let dir = tempdir().unwrap();
        let log = Arc::new(AppendLog::open(dir.path().join("intake.log")).unwrap());
        let (event_tx, _event_rx) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = test_config();
        let loop_log = Arc::clone(&log);
        let server = tokio::spawn(async move {
            let result = listener
                .accept_loop(loop_log, &config, event_tx, shutdown_rx)
                .await;
            (result, listener.drain(Duration::from_secs(5)).await)
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"payload").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        // Give the session time to reach EOF before draining.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        let (result, aborted) = server.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(aborted, 0);

        log.close().await.unwrap();
        let records = LogReader::read_all(log.path()).unwrap();
        let replayed: Vec<u8> = records.into_iter().flat_map(|r| r.payload).collect();
        assert_eq!(replayed, b"payload");
    }

    #[tokio::test]
    async fn append_failure_terminates_only_that_session() {
        let dir = tempdir().unwrap();
        let log = Arc::new(AppendLog::open(dir.path().join("intake.log")).unwrap());
        let (event_tx, mut event_rx) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = test_config();
        let loop_log = Arc::clone(&log);
        let server = tokio::spawn(async move {
            let result = listener
                .accept_loop(loop_log, &config, event_tx, shutdown_rx)
                .await;
            (result, listener.drain(Duration::from_secs(5)).await)
        });

        // Simulate a storage failure: every append now errors.
        log.close().await.unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"doomed bytes").await.unwrap();

        loop {
            match event_rx.recv().await.unwrap() {
                IngestEvent::ConnectionFailed {
                    connection_id,
                    reason,
                    ..
                } => {
                    assert_eq!(connection_id, 0);
                    assert!(reason.contains("closed"));
                    break;
                }
                _ => {}
            }
        }

        // The listener is unaffected: it keeps accepting and servicing
        // new connections.
        let second = TcpStream::connect(addr).await.unwrap();
        loop {
            match event_rx.recv().await.unwrap() {
                IngestEvent::ConnectionOpened { connection_id, .. } => {
                    assert_eq!(connection_id, 1);
                    break;
                }
                _ => {}
            }
        }

        drop(first);
        drop(second);
        shutdown_tx.send(true).unwrap();
        let (result, _) = server.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn session_limit_rejects_excess_connections() {
        let dir = tempdir().unwrap();
        let log = Arc::new(AppendLog::open(dir.path().join("intake.log")).unwrap());
        let (event_tx, mut event_rx) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = IngestConfig {
            max_sessions: Some(1),
            ..test_config()
        };
        let loop_log = Arc::clone(&log);
        let server = tokio::spawn(async move {
            let result = listener
                .accept_loop(loop_log, &config, event_tx, shutdown_rx)
                .await;
            (result, listener.drain(Duration::from_secs(5)).await)
        });

        // First connection occupies the only session slot.
        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"held open").await.unwrap();

        // Wait until the first session is up before connecting again.
        loop {
            match event_rx.recv().await.unwrap() {
                IngestEvent::ConnectionOpened { connection_id: 0, .. } => break,
                _ => {}
            }
        }

        let mut second = TcpStream::connect(addr).await.unwrap();
        // The rejected connection is closed immediately: read returns EOF.
        let mut buf = [0u8; 1];
        let n = second.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        loop {
            match event_rx.recv().await.unwrap() {
                IngestEvent::ConnectionRejected {
                    connection_id,
                    active_sessions,
                    ..
                } => {
                    assert_eq!(connection_id, 1);
                    assert_eq!(active_sessions, 1);
                    break;
                }
                _ => {}
            }
        }

        first.shutdown().await.unwrap();
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        let (result, aborted) = server.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(aborted, 0);
        log.close().await.unwrap();
    }
}
