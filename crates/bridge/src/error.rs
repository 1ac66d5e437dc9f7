//! Error types for the bridge crate.

use thiserror::Error;

/// Failure on the message channel side of a session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel was closed, either by the peer or locally.
    #[error("channel closed: {0}")]
    Closed(String),

    /// The peer violated the transport protocol (malformed frame, bad handshake).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Underlying socket error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure on the process side of a session.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// The pseudoterminal could not be allocated or the process could not be started.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Failed to signal the process.
    #[error("failed to terminate process: {0}")]
    TerminateFailed(String),

    /// A blocking I/O worker panicked or was cancelled.
    #[error("conduit task failed: {0}")]
    TaskFailed(String),

    /// Read or write on the PTY failed.
    #[error("conduit I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for channel operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type alias for conduit operations.
pub type ConduitResult<T> = std::result::Result<T, ConduitError>;
