//! Network layer.
//!
//! - [`websocket`]: splits a WebSocket connection into a session channel
//! - [`acceptor`]: upgrade checks and per-connection session startup

pub mod acceptor;
pub mod websocket;

pub use acceptor::{AcceptOutcome, Acceptor, Rejection};
pub use websocket::{ws_channel, WsSink, WsSource};
