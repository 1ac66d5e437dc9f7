//! Process conduit abstraction.
//!
//! A conduit is the I/O stream of a pseudoterminal-backed child process plus
//! a control handle for stopping it. Reads and writes are blocking; the
//! session runs them on tokio's blocking pool. The reader and writer are
//! separate handles so they can be used from two tasks at once.

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::error::ConduitResult;

/// Lifecycle control for the process behind a conduit.
///
/// Both operations may be invoked from either pump, possibly at the same
/// time, and possibly more than once. Implementations must make repeated
/// calls no-ops.
pub trait ProcessControl: Send + Sync {
    /// Process ID of the child, if known.
    fn pid(&self) -> Option<u32>;

    /// Signals the process to stop.
    fn terminate(&self) -> ConduitResult<()>;

    /// Releases the terminal descriptors and reaps the process.
    fn close(&self) -> ConduitResult<()>;
}

/// The process side of a session.
pub struct Conduit {
    /// Output of the process (PTY master read side).
    pub reader: Box<dyn Read + Send>,
    /// Input to the process (PTY master write side).
    pub writer: Box<dyn Write + Send>,
    /// Shared control handle used by teardown.
    pub process: Arc<dyn ProcessControl>,
}

impl Conduit {
    pub fn new(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        process: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            reader,
            writer,
            process,
        }
    }
}

impl std::fmt::Debug for Conduit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conduit")
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// Produces a fresh conduit for each accepted connection.
pub trait ConduitSpawner: Send + Sync {
    /// Starts a new process attached to a new pseudoterminal.
    fn spawn(&self) -> ConduitResult<Conduit>;
}

/// Returns true if a read error means the process side hung up rather than
/// failed.
///
/// On Linux a PTY master returns `EIO` once every slave descriptor is closed,
/// which is how a normal shell exit shows up after the output is drained.
pub fn is_hangup(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    err.kind() == io::ErrorKind::UnexpectedEof
}
