//! Joint teardown for a session.
//!
//! Either pump, or an external shutdown, may decide that the session is over.
//! Whoever gets there first stops the process, closes the conduit and marks
//! the channel closed. Every later attempt is a no-op, so the two pumps can
//! race on failure without double-killing or double-closing anything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use super::{SessionId, TerminationReason};
use crate::conduit::ProcessControl;

/// Single-shot teardown shared by both pumps and the shutdown watcher.
pub struct Teardown {
    session_id: SessionId,
    started: AtomicBool,
    reason: OnceLock<TerminationReason>,
    process: Arc<dyn ProcessControl>,
    closed: CancellationToken,
}

impl Teardown {
    /// Creates the guard for one session's process.
    pub fn new(session_id: SessionId, process: Arc<dyn ProcessControl>) -> Self {
        Self {
            session_id,
            started: AtomicBool::new(false),
            reason: OnceLock::new(),
            process,
            closed: CancellationToken::new(),
        }
    }

    /// Tears the session down on behalf of `reason`.
    ///
    /// Returns true if this call performed the teardown, false if another
    /// caller already had. Stopping the process may block (kill grace
    /// periods, reaping), so it runs on the blocking pool.
    pub async fn trigger(&self, reason: TerminationReason) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::trace!(
                session_id = %self.session_id,
                reason = %reason,
                "Teardown already done"
            );
            return false;
        }
        let _ = self.reason.set(reason);

        tracing::debug!(
            session_id = %self.session_id,
            reason = %reason,
            pid = ?self.process.pid(),
            "Tearing down session"
        );

        let process = Arc::clone(&self.process);
        let session_id = self.session_id.clone();
        let stopped =
            tokio::task::spawn_blocking(move || stop_process(&session_id, process.as_ref())).await;
        if let Err(e) = stopped {
            tracing::error!(
                session_id = %self.session_id,
                error = %e,
                "Process teardown task failed"
            );
        }

        // Wakes the inbound pump's pending receive and tells the outbound
        // pump to close the sink.
        self.closed.cancel();
        true
    }

    /// The reason recorded by the first successful `trigger`.
    pub fn reason(&self) -> Option<TerminationReason> {
        self.reason.get().copied()
    }

    /// Whether teardown has happened.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completes once teardown has happened.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

fn stop_process(session_id: &str, process: &dyn ProcessControl) {
    if let Err(e) = process.terminate() {
        tracing::warn!(
            session_id = %session_id,
            error = %e,
            "Failed to terminate process"
        );
    }

    if let Err(e) = process.close() {
        tracing::warn!(
            session_id = %session_id,
            error = %e,
            "Failed to close conduit"
        );
    }
}
