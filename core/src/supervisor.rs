//! Process-wide lifecycle supervisor
//!
//! The [`Supervisor`] owns the [`AppendLog`] and [`Listener`] instances
//! and passes them explicitly to the components that need them; nothing
//! in the engine reaches for shared globals. `run()` drives the server
//! through `Starting -> Running -> Draining -> Stopped`, published via a
//! watch channel, and guarantees the append log is flushed and closed on
//! every exit path.
//!
//! A [`SupervisorHandle`] is the control surface: it signals shutdown,
//! exposes the current state, the bound address, and an event
//! subscription.

use crate::applog::AppendLog;
use crate::config::IngestConfig;
use crate::events::{IngestEvent, ServerState};
use crate::listener::Listener;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Owner of the ingest server lifecycle
pub struct Supervisor {
    config: IngestConfig,
    event_tx: broadcast::Sender<IngestEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ServerState>,
    state_rx: watch::Receiver<ServerState>,
    addr_tx: watch::Sender<Option<SocketAddr>>,
    addr_rx: watch::Receiver<Option<SocketAddr>>,
}

/// Handle for controlling and observing a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    state_rx: watch::Receiver<ServerState>,
    addr_rx: watch::Receiver<Option<SocketAddr>>,
    event_tx: broadcast::Sender<IngestEvent>,
}

impl SupervisorHandle {
    /// Signal the server to stop accepting and begin the drain
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the current server state
    #[must_use]
    pub fn current_state(&self) -> ServerState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe_to_state(&self) -> watch::Receiver<ServerState> {
        self.state_rx.clone()
    }

    /// Subscribe to ingest events
    #[must_use]
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<IngestEvent> {
        self.event_tx.subscribe()
    }

    /// The listener's bound address, once the server is running.
    /// Useful when binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.addr_rx.borrow()
    }

    /// Wait until the server reaches `target`, or the supervisor is gone
    pub async fn wait_for_state(&self, target: ServerState) {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow() == target {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait for the listener's bound address to become known
    pub async fn wait_for_addr(&self) -> Option<SocketAddr> {
        let mut rx = self.addr_rx.clone();
        loop {
            if let Some(addr) = *rx.borrow() {
                return Some(addr);
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

impl Supervisor {
    /// Create a supervisor for the given configuration
    #[must_use]
    pub fn new(config: IngestConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ServerState::Starting);
        let (addr_tx, addr_rx) = watch::channel(None);
        Self {
            config,
            event_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            state_tx,
            state_rx,
            addr_tx,
            addr_rx,
        }
    }

    /// Get a control handle. Handles stay valid for the whole run.
    #[must_use]
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
            state_rx: self.state_rx.clone(),
            addr_rx: self.addr_rx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Run the server until shutdown is signaled or a fatal error occurs.
    ///
    /// Opens the append log, binds the listener, drives the accept loop,
    /// then drains in-flight sessions bounded by the grace timeout and
    /// closes the log. The log is closed on every exit path.
    ///
    /// # Errors
    /// Returns the fatal `Storage`, `Bind`, or `Listener` error that
    /// ended the run.
    pub async fn run(self) -> Result<()> {
        info!("Starting intake server on {}", self.config.bind_addr());
        self.set_state(ServerState::Starting);

        let log = match AppendLog::open(&self.config.log_path) {
            Ok(log) => Arc::new(log),
            Err(e) => {
                self.set_state(ServerState::Stopped);
                return Err(e);
            }
        };

        let mut listener = match Listener::bind(&self.config.bind_addr()).await {
            Ok(listener) => listener,
            Err(e) => {
                let _ = log.close().await;
                self.set_state(ServerState::Stopped);
                return Err(e);
            }
        };
        let _ = self.addr_tx.send(listener.local_addr().ok());
        self.set_state(ServerState::Running);

        let loop_result = listener
            .accept_loop(
                Arc::clone(&log),
                &self.config,
                self.event_tx.clone(),
                self.shutdown_rx.clone(),
            )
            .await;

        self.set_state(ServerState::Draining);
        let active = listener.active_sessions() as u64;
        let _ = self.event_tx.send(IngestEvent::draining(active));
        let aborted = listener.drain(self.config.grace_timeout()).await;
        if aborted > 0 {
            warn!("{} session(s) did not finish within the grace timeout", aborted);
        }

        let next_sequence = log.next_sequence().await;
        let close_result = log.close().await;
        let _ = self.event_tx.send(IngestEvent::log_closed(next_sequence));
        self.set_state(ServerState::Stopped);

        loop_result?;
        close_result?;
        info!("intake server stopped cleanly");
        Ok(())
    }

    fn set_state(&self, state: ServerState) {
        info!("Server state: {:?}", state);
        let _ = self.state_tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applog::LogReader;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    fn test_config(dir: &tempfile::TempDir) -> IngestConfig {
        IngestConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            log_path: dir.path().join("intake.log"),
            grace_timeout_secs: 5,
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn clean_startup_and_shutdown() {
        let dir = tempdir().unwrap();
        let supervisor = Supervisor::new(test_config(&dir));
        let handle = supervisor.handle();

        let server = tokio::spawn(supervisor.run());

        timeout(Duration::from_secs(5), handle.wait_for_state(ServerState::Running))
            .await
            .unwrap();
        assert!(handle.local_addr().is_some());

        handle.shutdown();
        let result = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(handle.current_state(), ServerState::Stopped);

        // The log was created, headered, and cleanly closed.
        let records = LogReader::read_all(dir.path().join("intake.log")).unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn bind_failure_surfaces_and_stops() {
        let dir = tempdir().unwrap();
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = holder.local_addr().unwrap();

        let config = IngestConfig {
            port: addr.port(),
            ..test_config(&dir)
        };
        let supervisor = Supervisor::new(config);
        let handle = supervisor.handle();

        let err = supervisor.run().await.unwrap_err();
        assert_eq!(err.code(), "ING002");
        assert_eq!(handle.current_state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn ingests_one_connection_end_to_end() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        let log_path = config.log_path.clone();
        let supervisor = Supervisor::new(config);
        let handle = supervisor.handle();
        let mut events = handle.subscribe_to_events();

        let server = tokio::spawn(supervisor.run());
        let addr = timeout(Duration::from_secs(5), handle.wait_for_addr())
            .await
            .unwrap()
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello supervisor").await.unwrap();
        client.shutdown().await.unwrap();
        drop(client);

        // Wait for the session to finish before shutting down.
        loop {
            match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
                Ok(IngestEvent::ConnectionClosed { bytes_read, .. }) => {
                    assert_eq!(bytes_read, 16);
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("event stream ended early: {e}"),
            }
        }

        handle.shutdown();
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();

        let replayed: Vec<u8> = LogReader::read_all(&log_path)
            .unwrap()
            .into_iter()
            .flat_map(|r| r.payload)
            .collect();
        assert_eq!(replayed, b"hello supervisor");
    }

    #[tokio::test]
    async fn state_transitions_are_observable() {
        let dir = tempdir().unwrap();
        let supervisor = Supervisor::new(test_config(&dir));
        let handle = supervisor.handle();
        let mut state_rx = handle.subscribe_to_state();

        let server = tokio::spawn(supervisor.run());
        let mut seen = vec![*state_rx.borrow()];
        while !seen.contains(&ServerState::Running) {
            timeout(Duration::from_secs(5), state_rx.changed())
                .await
                .unwrap()
                .unwrap();
            seen.push(*state_rx.borrow());
        }

        handle.shutdown();
        while !seen.contains(&ServerState::Stopped) {
            timeout(Duration::from_secs(5), state_rx.changed())
                .await
                .unwrap()
                .unwrap();
            seen.push(*state_rx.borrow());
        }
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();

        let running = seen.iter().position(|s| *s == ServerState::Running).unwrap();
        let draining = seen.iter().position(|s| *s == ServerState::Draining).unwrap();
        let stopped = seen.iter().position(|s| *s == ServerState::Stopped).unwrap();
        assert!(running < draining && draining < stopped);
    }
}
