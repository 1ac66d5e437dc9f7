//! # WebShell Session Bridge
//!
//! This crate is the core of WebShell: it connects one client message
//! channel to one pseudoterminal-backed process and pumps bytes both ways
//! until either side goes away.
//!
//! ## Overview
//!
//! ```text
//!   client ──► MessageSource ──► inbound pump ──► conduit writer ──► PTY / shell
//!   client ◄── MessageSink   ◄── outbound pump ◄── conduit reader ◄── PTY / shell
//! ```
//!
//! - **Channel**: ordered, message-oriented transport split into a receive
//!   half and a send half ([`channel`]).
//! - **Conduit**: blocking reader/writer over the PTY plus a process control
//!   handle ([`conduit`]).
//! - **Session**: runs the two pumps and guarantees joint, exactly-once
//!   teardown ([`session`]).
//!
//! Payloads are opaque. Byte order within each direction is preserved;
//! message boundaries are not.
//!
//! The crate does not know about WebSockets or PTY libraries. The daemon
//! crate supplies those implementations.

pub mod channel;
pub mod conduit;
pub mod error;
pub mod session;

pub use channel::{Channel, MemoryPeer, MessageSink, MessageSource};
pub use conduit::{Conduit, ConduitSpawner, ProcessControl};
pub use error::{ConduitError, ConduitResult, TransportError, TransportResult};
pub use session::{
    Liveness, SessionBridge, SessionId, Teardown, TerminationReason, DEFAULT_READ_BUFFER_SIZE,
};
