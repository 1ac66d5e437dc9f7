//! WebSocket transport for sessions.
//!
//! A [`WebSocketStream`] is split into a [`WsSource`] and a [`WsSink`] so the
//! two session pumps can use it concurrently. Text and binary frames are both
//! delivered as raw bytes; terminal output always goes out as binary frames.

use bridge::{Channel, MessageSink, MessageSource, TransportError, TransportResult};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::error::ProtocolError as WsProtocolError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;

/// Splits an upgraded connection into a session channel.
pub fn ws_channel<S>(ws: WebSocketStream<S>, peer: impl Into<String>) -> Channel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    Channel::new(peer, WsSource::new(stream), WsSink::new(sink))
}

/// Receive half of a WebSocket channel.
pub struct WsSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> WsSource<S> {
    pub fn new(stream: SplitStream<WebSocketStream<S>>) -> Self {
        Self { stream }
    }
}

impl<S> MessageSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn recv(&mut self) -> BoxFuture<'_, TransportResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(WsMessage::Binary(data))) => return Ok(Some(data)),
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.into_bytes())),
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::debug!(frame = ?frame, "Peer sent close frame");
                        return Ok(None);
                    }
                    // Pings are answered by tungstenite itself.
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                        continue
                    }
                    Some(Err(e)) if is_closed(&e) => return Ok(None),
                    Some(Err(e)) => return Err(transport_error(e)),
                    None => return Ok(None),
                }
            }
        })
    }
}

/// Send half of a WebSocket channel.
pub struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    closed: bool,
}

impl<S> WsSink<S> {
    pub fn new(sink: SplitSink<WebSocketStream<S>, WsMessage>) -> Self {
        Self {
            sink,
            closed: false,
        }
    }
}

impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send(&mut self, data: Vec<u8>) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(TransportError::Closed("sink already closed".to_string()));
            }
            self.sink
                .send(WsMessage::Binary(data))
                .await
                .map_err(transport_error)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;

            let frame = close_frame(CloseCode::Normal, "session ended");
            match self.sink.send(WsMessage::Close(Some(frame))).await {
                Ok(()) => Ok(()),
                Err(e) if is_closed(&e) => Ok(()),
                Err(e) => Err(transport_error(e)),
            }
        })
    }
}

/// Builds a close frame with a static reason.
pub fn close_frame(code: CloseCode, reason: &'static str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: reason.into(),
    }
}

/// Errors that only mean the connection is already gone.
fn is_closed(err: &WsError) -> bool {
    matches!(err, WsError::ConnectionClosed | WsError::AlreadyClosed)
}

fn transport_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Closed(err.to_string())
        }
        WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::Closed(err.to_string())
        }
        WsError::Io(e) => TransportError::Io(e),
        other => TransportError::Protocol(other.to_string()),
    }
}
