//! The two directional pumps.
//!
//! Each pump owns one half of the channel and one half of the conduit and
//! never touches the other pump's halves. When a pump sees its source or
//! destination fail it triggers the shared [`Teardown`] and exits; when the
//! sibling has already torn down it exits quietly.

use std::io::{self, Read, Write};
use std::sync::Arc;

use super::{SessionId, Teardown, TerminationReason};
use crate::channel::{MessageSink, MessageSource};
use crate::conduit::is_hangup;
use crate::error::TransportError;

/// Channel → conduit.
///
/// Receives one message at a time and writes all of it to the process
/// before receiving the next.
pub(crate) async fn inbound(
    session_id: SessionId,
    mut source: Box<dyn MessageSource>,
    mut writer: Box<dyn Write + Send>,
    teardown: Arc<Teardown>,
) {
    let mut messages: u64 = 0;
    let mut bytes: u64 = 0;

    let reason = loop {
        let received = tokio::select! {
            biased;
            _ = teardown.closed() => break None,
            received = source.recv() => received,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(session_id = %session_id, pump = "inbound", "Channel closed by peer");
                break Some(TerminationReason::TransportClosed);
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    pump = "inbound",
                    error = %e,
                    "Channel receive failed"
                );
                break Some(transport_reason(&e));
            }
        };

        if data.is_empty() {
            continue;
        }
        let len = data.len() as u64;

        let written = tokio::task::spawn_blocking(move || {
            let result = writer.write_all(&data).and_then(|()| writer.flush());
            (writer, result)
        })
        .await;

        match written {
            Ok((w, Ok(()))) => {
                writer = w;
                messages += 1;
                bytes += len;
            }
            Ok((_, Err(e))) => {
                let reason = write_reason(&e);
                if reason == TerminationReason::ConduitError {
                    tracing::warn!(
                        session_id = %session_id,
                        pump = "inbound",
                        error = %e,
                        "Conduit write failed"
                    );
                } else {
                    tracing::debug!(session_id = %session_id, pump = "inbound", "Conduit closed on write");
                }
                break Some(reason);
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    pump = "inbound",
                    error = %e,
                    "Conduit write task failed"
                );
                break Some(TerminationReason::ConduitError);
            }
        }
    };

    if let Some(reason) = reason {
        teardown.trigger(reason).await;
    }

    tracing::debug!(
        session_id = %session_id,
        pump = "inbound",
        messages = messages,
        bytes = bytes,
        "Inbound pump stopped"
    );
}

/// Conduit → channel.
///
/// Reads at most `buffer_size` bytes at a time and sends each read as one
/// message. Owns the sink, so it is also the one that closes the channel on
/// the way out.
pub(crate) async fn outbound(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    mut sink: Box<dyn MessageSink>,
    buffer_size: usize,
    teardown: Arc<Teardown>,
) {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut messages: u64 = 0;
    let mut bytes: u64 = 0;

    let reason = loop {
        let read = tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut buffer = buffer;
            let result = reader.read(&mut buffer);
            (reader, buffer, result)
        });

        // An abandoned read keeps running on the blocking pool until the
        // killed process hangs up the terminal, then drops its handles.
        let joined = tokio::select! {
            biased;
            _ = teardown.closed() => break None,
            joined = read => joined,
        };

        let (r, b, result) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    pump = "outbound",
                    error = %e,
                    "Conduit read task failed"
                );
                break Some(TerminationReason::ConduitError);
            }
        };
        reader = r;
        buffer = b;

        let n = match result {
            Ok(0) => {
                tracing::debug!(session_id = %session_id, pump = "outbound", "Conduit reached end of stream");
                break Some(TerminationReason::ConduitClosed);
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_hangup(&e) => {
                tracing::debug!(session_id = %session_id, pump = "outbound", "Conduit hung up");
                break Some(TerminationReason::ConduitClosed);
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    pump = "outbound",
                    error = %e,
                    "Conduit read failed"
                );
                break Some(TerminationReason::ConduitError);
            }
        };

        let sent = tokio::select! {
            biased;
            _ = teardown.closed() => break None,
            sent = sink.send(buffer[..n].to_vec()) => sent,
        };

        if let Err(e) = sent {
            tracing::warn!(
                session_id = %session_id,
                pump = "outbound",
                error = %e,
                "Channel send failed"
            );
            break Some(transport_reason(&e));
        }
        messages += 1;
        bytes += n as u64;
    };

    if let Some(reason) = reason {
        teardown.trigger(reason).await;
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(
            session_id = %session_id,
            pump = "outbound",
            error = %e,
            "Channel close failed"
        );
    }

    tracing::debug!(
        session_id = %session_id,
        pump = "outbound",
        messages = messages,
        bytes = bytes,
        "Outbound pump stopped"
    );
}

fn transport_reason(err: &TransportError) -> TerminationReason {
    match err {
        TransportError::Closed(_) => TerminationReason::TransportClosed,
        TransportError::Protocol(_) | TransportError::Io(_) => TerminationReason::TransportError,
    }
}

fn write_reason(err: &io::Error) -> TerminationReason {
    if err.kind() == io::ErrorKind::BrokenPipe || is_hangup(err) {
        TerminationReason::ConduitClosed
    } else {
        TerminationReason::ConduitError
    }
}
