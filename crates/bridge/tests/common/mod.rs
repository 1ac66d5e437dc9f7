//! Test conduit backed by a Unix socket pair.
//!
//! One end is handed to the session as its conduit; the other end plays the
//! process. Terminating the "process" shuts its end down, which the session
//! observes as end-of-stream on read and a broken pipe on write.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bridge::{
    Conduit, ConduitResult, MessageSink, ProcessControl, TransportError, TransportResult,
};
use futures_util::future::BoxFuture;

pub struct SocketProcess {
    end: UnixStream,
    pub terminated: AtomicUsize,
    pub closed: AtomicUsize,
}

impl SocketProcess {
    pub fn terminate_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ProcessControl for SocketProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn terminate(&self) -> ConduitResult<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        let _ = self.end.shutdown(Shutdown::Both);
        Ok(())
    }

    fn close(&self) -> ConduitResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The process side of a socket conduit.
pub struct FakeProcess {
    pub stream: UnixStream,
    pub control: Arc<SocketProcess>,
}

impl FakeProcess {
    /// Reads exactly `len` bytes of input written by the session.
    pub fn read_input(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).unwrap();
        buf
    }

    /// Writes output for the session to forward.
    pub fn write_output(&mut self, data: &[u8]) {
        self.stream.write_all(data).unwrap();
    }

    /// Simulates the process exiting on its own.
    pub fn exit(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub fn socket_conduit() -> (Conduit, FakeProcess) {
    let (session_end, process_end) = UnixStream::pair().unwrap();

    let control = Arc::new(SocketProcess {
        end: process_end.try_clone().unwrap(),
        terminated: AtomicUsize::new(0),
        closed: AtomicUsize::new(0),
    });

    let conduit = Conduit::new(
        Box::new(session_end.try_clone().unwrap()),
        Box::new(session_end),
        control.clone(),
    );
    let process = FakeProcess {
        stream: process_end,
        control,
    };
    (conduit, process)
}

/// Process input that refuses every write.
pub struct RejectingWriter;

impl Write for RejectingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "terminal is read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Channel send half whose connection was reset.
pub struct ResetSink;

impl MessageSink for ResetSink {
    fn send(&mut self, _data: Vec<u8>) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async {
            Err(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
