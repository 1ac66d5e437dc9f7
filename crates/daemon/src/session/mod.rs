//! Shell processes for sessions.
//!
//! The session bridge itself lives in the `bridge` crate; this module
//! supplies the PTY-backed conduits it runs against.

pub mod pty;

pub use pty::{PtyProcess, PtySpawner, ShellCommand};
