//! Transport channel abstraction.
//!
//! A channel is an ordered, message-oriented byte pipe to the client. The
//! bridge takes it already split into a receive half ([`MessageSource`]) and
//! a send half ([`MessageSink`]) so that each half is owned by exactly one
//! pump: the inbound pump only receives, the outbound pump only sends.
//!
//! Implementations must allow the two halves to be driven from different
//! tasks at the same time. Message types (text/binary) are not distinguished;
//! every message is an opaque byte payload.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};

/// Receive half of a transport channel.
pub trait MessageSource: Send {
    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` once the peer has closed the channel cleanly.
    fn recv(&mut self) -> BoxFuture<'_, TransportResult<Option<Vec<u8>>>>;
}

/// Send half of a transport channel.
pub trait MessageSink: Send {
    /// Sends one message containing exactly `data`.
    fn send(&mut self, data: Vec<u8>) -> BoxFuture<'_, TransportResult<()>>;

    /// Closes the channel. Calling this more than once is harmless.
    fn close(&mut self) -> BoxFuture<'_, TransportResult<()>>;
}

/// A transport channel handed to a session, split into its two halves.
pub struct Channel {
    /// Human-readable peer label used in log lines.
    pub peer: String,
    /// Receive half, owned by the inbound pump.
    pub source: Box<dyn MessageSource>,
    /// Send half, owned by the outbound pump.
    pub sink: Box<dyn MessageSink>,
}

impl Channel {
    /// Bundles two halves into a channel.
    pub fn new(
        peer: impl Into<String>,
        source: impl MessageSource + 'static,
        sink: impl MessageSink + 'static,
    ) -> Self {
        Self {
            peer: peer.into(),
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("peer", &self.peer).finish()
    }
}

/// Creates an in-process channel and the client end that drives it.
///
/// Useful for embedding the bridge behind a non-network transport and for
/// exercising sessions without sockets.
pub fn memory(peer: impl Into<String>) -> (Channel, MemoryPeer) {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();

    let channel = Channel::new(
        peer,
        MemorySource { rx: client_rx },
        MemorySink {
            tx: Some(server_tx),
        },
    );
    let peer = MemoryPeer {
        tx: Some(client_tx),
        rx: server_rx,
    };
    (channel, peer)
}

/// Receive half of an in-process channel.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<TransportResult<Vec<u8>>>,
}

impl MessageSource for MemorySource {
    fn recv(&mut self) -> BoxFuture<'_, TransportResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(Ok(data)) => Ok(Some(data)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }
}

/// Send half of an in-process channel.
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl MessageSink for MemorySink {
    fn send(&mut self, data: Vec<u8>) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let tx = self
                .tx
                .as_ref()
                .ok_or_else(|| TransportError::Closed("sink already closed".to_string()))?;
            tx.send(data)
                .map_err(|_| TransportError::Closed("client end dropped".to_string()))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            self.tx.take();
            Ok(())
        })
    }
}

/// Client end of an in-process channel.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<TransportResult<Vec<u8>>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Sends a message towards the session. Returns false once disconnected.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        match self.tx {
            Some(ref tx) => tx.send(Ok(data.into())).is_ok(),
            None => false,
        }
    }

    /// Delivers a transport fault to the session's next receive.
    pub fn inject_error(&self, error: TransportError) -> bool {
        match self.tx {
            Some(ref tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Closes the client side; the session observes a clean close.
    pub fn disconnect(&mut self) {
        self.tx.take();
    }

    /// Receives the next message sent by the session, or `None` once the
    /// session has closed the channel.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Drains every message until the session closes the channel and
    /// returns them concatenated.
    pub async fn collect(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }
}
