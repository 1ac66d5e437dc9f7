//! Session bridge.
//!
//! A session pairs one transport channel with one process conduit and pumps
//! bytes between them until either side ends. The two pumps run as separate
//! tokio tasks and share nothing but a [`Teardown`] guard; whichever pump
//! notices a terminal condition first stops the process, closes the conduit
//! and closes the channel, and the other pump then winds down on its own.

mod pump;
mod teardown;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::Channel;
use crate::conduit::Conduit;

pub use teardown::Teardown;

/// Unique identifier for a session.
pub type SessionId = String;

/// Default number of bytes read from the process per outbound message.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// The client closed the channel.
    TransportClosed,
    /// The channel failed (network error, malformed frame).
    TransportError,
    /// The process exited and its output was drained, or its input was closed.
    ConduitClosed,
    /// Reading from or writing to the process failed.
    ConduitError,
    /// The server asked the session to stop.
    ExplicitShutdown,
}

impl TerminationReason {
    /// Kebab-case name used in logs and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::TransportClosed => "transport-closed",
            TerminationReason::TransportError => "transport-error",
            TerminationReason::ConduitClosed => "conduit-closed",
            TerminationReason::ConduitError => "conduit-error",
            TerminationReason::ExplicitShutdown => "explicit-shutdown",
        }
    }

    /// Whether the channel side ended the session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TerminationReason::TransportClosed | TerminationReason::TransportError
        )
    }

    /// Whether the process side ended the session.
    pub fn is_conduit(&self) -> bool {
        matches!(
            self,
            TerminationReason::ConduitClosed | TerminationReason::ConduitError
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of whether a session's pumps are still running.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// True between the start of [`SessionBridge::run`] and the moment both
    /// pumps have stopped.
    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, live: bool) {
        self.0.store(live, Ordering::SeqCst);
    }
}

/// Runs one session.
///
/// # Example
///
/// ```rust,no_run
/// # async fn example(channel: bridge::Channel, conduit: bridge::Conduit) {
/// use bridge::SessionBridge;
///
/// let reason = SessionBridge::new().run(channel, conduit).await;
/// println!("session ended: {reason}");
/// # }
/// ```
pub struct SessionBridge {
    id: SessionId,
    read_buffer_size: usize,
    shutdown: Option<CancellationToken>,
    liveness: Liveness,
}

impl Default for SessionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBridge {
    /// Creates a bridge with a fresh session ID.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Creates a bridge with a caller-chosen session ID.
    pub fn with_id(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            shutdown: None,
            liveness: Liveness::default(),
        }
    }

    /// Sets the outbound read buffer size. Zero is treated as one.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Ends the session with [`TerminationReason::ExplicitShutdown`] when
    /// `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns a handle that reports whether the session is running.
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Pumps data between `channel` and `conduit` until either side ends.
    ///
    /// Both handles are owned by the session for the duration of the call.
    /// Faults on either side are not returned as errors; they end the
    /// session and are reported through the returned reason.
    pub async fn run(self, channel: Channel, conduit: Conduit) -> TerminationReason {
        let Channel { peer, source, sink } = channel;
        let Conduit {
            reader,
            writer,
            process,
        } = conduit;

        let session_id = self.id;
        let pid = process.pid();
        let teardown = Arc::new(Teardown::new(session_id.clone(), process));

        self.liveness.set(true);
        tracing::info!(
            session_id = %session_id,
            peer = %peer,
            pid = ?pid,
            "Session started"
        );

        let watcher = self.shutdown.map(|token| {
            let teardown = Arc::clone(&teardown);
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        teardown.trigger(TerminationReason::ExplicitShutdown).await;
                    }
                    _ = teardown.closed() => {}
                }
            })
        });

        let inbound = tokio::spawn(pump::inbound(
            session_id.clone(),
            source,
            writer,
            Arc::clone(&teardown),
        ));
        let outbound = tokio::spawn(pump::outbound(
            session_id.clone(),
            reader,
            sink,
            self.read_buffer_size,
            Arc::clone(&teardown),
        ));

        // A pump that panics never triggers teardown itself, which would
        // leave its sibling blocked forever.
        let inbound_done = async {
            if let Err(e) = inbound.await {
                tracing::error!(session_id = %session_id, pump = "inbound", error = %e, "Pump task failed");
                teardown.trigger(TerminationReason::TransportError).await;
            }
        };
        let outbound_done = async {
            if let Err(e) = outbound.await {
                tracing::error!(session_id = %session_id, pump = "outbound", error = %e, "Pump task failed");
                teardown.trigger(TerminationReason::ConduitError).await;
            }
        };
        tokio::join!(inbound_done, outbound_done);

        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        self.liveness.set(false);

        let reason = teardown
            .reason()
            .unwrap_or(TerminationReason::ExplicitShutdown);
        tracing::info!(
            session_id = %session_id,
            peer = %peer,
            reason = %reason,
            "Session ended"
        );
        reason
    }
}
