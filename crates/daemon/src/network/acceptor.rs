//! Connection acceptor.
//!
//! Turns an accepted TCP stream into a running session: checks the upgrade
//! request's path and origin, completes the WebSocket handshake, starts a
//! shell and runs a [`SessionBridge`] until either side ends. Rejected
//! requests never reach the spawner.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bridge::{ConduitError, ConduitSpawner, SessionBridge, SessionId, TerminationReason};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::network::websocket::{close_frame, ws_channel};
use crate::origin::OriginPolicy;

/// How long a client may take to complete the upgrade request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why an upgrade request was turned away.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    /// The request targeted a path other than the upgrade endpoint.
    #[error("unknown path: {0}")]
    WrongPath(String),

    /// The `Origin` header is missing or not allowed.
    #[error("origin not allowed: {}", .0.as_deref().unwrap_or("<none>"))]
    OriginNotAllowed(Option<String>),

    /// The request was not a valid WebSocket upgrade.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl Rejection {
    /// HTTP status returned to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::WrongPath(_) => StatusCode::NOT_FOUND,
            Rejection::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            Rejection::Handshake(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Result of handling one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The upgrade was refused; no process was started.
    Rejected(Rejection),
    /// The upgrade succeeded but the shell could not be started.
    SpawnFailed(String),
    /// A session ran and ended.
    Completed {
        session_id: SessionId,
        reason: TerminationReason,
    },
}

/// Upgrades connections and runs one session per connection.
pub struct Acceptor {
    path: String,
    origins: OriginPolicy,
    spawner: Arc<dyn ConduitSpawner>,
    read_buffer_size: usize,
}

impl Acceptor {
    pub fn new(
        path: impl Into<String>,
        origins: OriginPolicy,
        spawner: Arc<dyn ConduitSpawner>,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            path: path.into(),
            origins,
            spawner,
            read_buffer_size,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn origins(&self) -> &OriginPolicy {
        &self.origins
    }

    /// Checks an upgrade request against the path and origin policy.
    pub fn check_request(&self, request: &Request) -> Result<(), Rejection> {
        let path = request.uri().path();
        if path != self.path {
            return Err(Rejection::WrongPath(path.to_string()));
        }

        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok());
        if !self.origins.allows(origin) {
            return Err(Rejection::OriginNotAllowed(origin.map(str::to_string)));
        }

        Ok(())
    }

    /// Performs the WebSocket handshake, refusing disallowed requests with
    /// an HTTP error response.
    pub async fn upgrade<S>(&self, stream: S) -> Result<WebSocketStream<S>, Rejection>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut rejection = None;
        let callback = |request: &Request, response: Response| {
            match self.check_request(request) {
                Ok(()) => Ok(response),
                Err(reason) => {
                    let mut error = ErrorResponse::new(Some(reason.to_string()));
                    *error.status_mut() = reason.status();
                    rejection = Some(reason);
                    Err(error)
                }
            }
        };

        let result = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::accept_hdr_async(stream, callback),
        )
        .await;
        match result {
            Ok(Ok(ws)) => Ok(ws),
            Ok(Err(e)) => Err(rejection.unwrap_or_else(|| Rejection::Handshake(e.to_string()))),
            Err(_) => Err(Rejection::Handshake("timed out".to_string())),
        }
    }

    /// Handles one connection from upgrade to session end.
    pub async fn handle<S>(
        &self,
        stream: S,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> AcceptOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.handle_with(stream, peer, shutdown, |_| {}).await
    }

    /// Like [`Acceptor::handle`], calling `on_open` once the session starts.
    pub async fn handle_with<S, F>(
        &self,
        stream: S,
        peer: SocketAddr,
        shutdown: CancellationToken,
        on_open: F,
    ) -> AcceptOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(&SessionId) + Send,
    {
        let mut ws = match self.upgrade(stream).await {
            Ok(ws) => ws,
            Err(rejection) => {
                tracing::warn!(peer = %peer, reason = %rejection, "Rejected connection");
                return AcceptOutcome::Rejected(rejection);
            }
        };

        let spawner = Arc::clone(&self.spawner);
        let spawned = tokio::task::spawn_blocking(move || spawner.spawn())
            .await
            .unwrap_or_else(|e| Err(ConduitError::TaskFailed(e.to_string())));

        let conduit = match spawned {
            Ok(conduit) => conduit,
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "Failed to start shell");
                let frame = close_frame(CloseCode::Error, "failed to start shell");
                if let Err(close_err) = ws.close(Some(frame)).await {
                    tracing::debug!(peer = %peer, error = %close_err, "Failed to send close frame");
                }
                return AcceptOutcome::SpawnFailed(e.to_string());
            }
        };

        let bridge = SessionBridge::new()
            .with_read_buffer_size(self.read_buffer_size)
            .with_shutdown(shutdown);
        let session_id = bridge.id().clone();

        tracing::debug!(
            session_id = %session_id,
            peer = %peer,
            pid = ?conduit.process.pid(),
            "Shell started for connection"
        );
        on_open(&session_id);

        let reason = bridge.run(ws_channel(ws, peer.to_string()), conduit).await;
        AcceptOutcome::Completed { session_id, reason }
    }
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("path", &self.path)
            .field("origins", &self.origins)
            .field("read_buffer_size", &self.read_buffer_size)
            .finish_non_exhaustive()
    }
}
