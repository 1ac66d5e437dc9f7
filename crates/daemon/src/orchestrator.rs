//! Server orchestrator.
//!
//! Owns the listening socket and the accept loop. Every accepted connection
//! runs on its own task; the orchestrator keeps no registry of sessions and
//! only tracks the tasks so that shutdown can wait for them to drain.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bridge::{ConduitSpawner, SessionId, TerminationReason};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::network::{AcceptOutcome, Acceptor, Rejection};
use crate::origin::OriginPolicy;
use crate::session::{PtySpawner, ShellCommand};

/// How long `stop` waits for running sessions to finish.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Server orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A session started for a peer.
    SessionOpened { session_id: SessionId, peer: SocketAddr },
    /// A session ended.
    SessionClosed {
        session_id: SessionId,
        reason: TerminationReason,
    },
    /// An upgrade request was refused.
    ConnectionRejected { peer: SocketAddr, reason: Rejection },
    /// Error occurred.
    Error { message: String },
}

/// Accepts WebSocket connections and runs one shell session per connection.
pub struct ServerOrchestrator {
    /// Configuration.
    config: Config,
    /// Per-connection handler.
    acceptor: Arc<Acceptor>,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Address the listener is bound to, once started.
    local_addr: Option<SocketAddr>,
    /// Accept loop and connection tasks.
    tracker: TaskTracker,
    /// Number of sessions currently running.
    active_sessions: Arc<AtomicUsize>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl ServerOrchestrator {
    /// Creates an orchestrator that spawns the configured shell on a PTY.
    pub fn new(config: Config) -> Self {
        let spawner = PtySpawner::new(ShellCommand::from_config(&config.session));
        Self::with_spawner(config, Arc::new(spawner))
    }

    /// Creates an orchestrator with a custom process spawner.
    pub fn with_spawner(config: Config, spawner: Arc<dyn ConduitSpawner>) -> Self {
        let acceptor = Acceptor::new(
            config.server.path.clone(),
            OriginPolicy::from_config(&config.security),
            spawner,
            config.session.read_buffer_size,
        );
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            acceptor: Arc::new(acceptor),
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            local_addr: None,
            tracker: TaskTracker::new(),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            shutdown_token: CancellationToken::new(),
            event_tx,
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Subscribes to orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the configured port is 0.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        let (listener, local_addr) = match self.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::Error {
                    message: format!("{:#}", e),
                });
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                return Err(e);
            }
        };
        self.local_addr = Some(local_addr);

        info!(
            addr = %local_addr,
            path = %self.acceptor.path(),
            shell = %self.config.session.default_shell,
            allow_all_origins = self.acceptor.origins().is_allow_all(),
            "WebSocket server listening"
        );
        if self.acceptor.origins().is_allow_all() {
            warn!("Origin checks are disabled; any web page can open a shell");
        }

        self.tracker.spawn(Self::accept_loop(
            listener,
            Arc::clone(&self.acceptor),
            self.tracker.clone(),
            Arc::clone(&self.active_sessions),
            self.shutdown_token.clone(),
            self.event_tx.clone(),
        ));

        *self.state.write().await = OrchestratorState::Running;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        Ok(local_addr)
    }

    async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        Ok((listener, local_addr))
    }

    async fn accept_loop(
        listener: TcpListener,
        acceptor: Arc<Acceptor>,
        tracker: TaskTracker,
        active_sessions: Arc<AtomicUsize>,
        shutdown_token: CancellationToken,
        event_tx: broadcast::Sender<OrchestratorEvent>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("Accept loop stopping");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "TCP accept error");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Accepted TCP connection");

                    tracker.spawn(Self::handle_connection(
                        stream,
                        peer,
                        Arc::clone(&acceptor),
                        Arc::clone(&active_sessions),
                        shutdown_token.clone(),
                        event_tx.clone(),
                    ));
                }
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        acceptor: Arc<Acceptor>,
        active_sessions: Arc<AtomicUsize>,
        shutdown_token: CancellationToken,
        event_tx: broadcast::Sender<OrchestratorEvent>,
    ) {
        let opened_tx = event_tx.clone();
        let counter = Arc::clone(&active_sessions);
        let outcome = acceptor
            .handle_with(stream, peer, shutdown_token, move |session_id| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = opened_tx.send(OrchestratorEvent::SessionOpened {
                    session_id: session_id.clone(),
                    peer,
                });
            })
            .await;

        let event = match outcome {
            AcceptOutcome::Completed { session_id, reason } => {
                active_sessions.fetch_sub(1, Ordering::SeqCst);
                OrchestratorEvent::SessionClosed { session_id, reason }
            }
            AcceptOutcome::Rejected(reason) => {
                OrchestratorEvent::ConnectionRejected { peer, reason }
            }
            AcceptOutcome::SpawnFailed(message) => {
                error!(peer = %peer, error = %message, "Session not started");
                OrchestratorEvent::Error { message }
            }
        };
        let _ = event_tx.send(event);
    }

    /// Stops accepting connections and ends every running session.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!(
            active_sessions = self.active_sessions(),
            "Stopping WebSocket server..."
        );

        self.shutdown_token.cancel();
        self.tracker.close();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.len(),
                "Timed out waiting for sessions to end"
            );
        }

        *self.state.write().await = OrchestratorState::Stopped;
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("WebSocket server stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}
