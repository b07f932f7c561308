//! Connections and their capability surface.
//!
//! Every connection, server-accepted or client-initiated, exposes the same
//! capability set through the [`Channel`] trait. The concrete variant is
//! chosen at construction: [`ServerConnection`] for sockets accepted by the
//! network layer, [`ClientConnection`] for outbound connects.

mod client;
mod server;

pub use client::ClientConnection;
pub use server::ServerConnection;

use crate::config::ConnectionConfig;
use crate::error::Error;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lifecycle state of a connection.
///
/// A connection starts at `Opening`, may become `Open` once the protocol
/// above acknowledges it, and moves to `Closed` exactly once, from any
/// thread, idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Opening = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Opening,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }
}

/// The uniform operation surface every connection exposes, regardless of
/// its concrete origin.
///
/// Jobs reference connections through this trait, so the job consumer never
/// cares whether a connection came from `accept` or from an outbound
/// connect.
pub trait Channel: Send + Sync {
    /// Stable identifier of this connection within its layer.
    fn id(&self) -> usize;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Marks the connection `Open`. A no-op once the connection is closed.
    fn open(&self);

    /// Buffer configuration bound at construction.
    fn config(&self) -> &ConnectionConfig;

    /// Writes the whole buffer to the socket.
    ///
    /// Short writes continue from the unsent offset; interrupted and
    /// would-block conditions are retried without backoff. Any other
    /// failure is terminal and reported as [`Error::ConnectionClosed`].
    fn write(&self, data: &[u8]) -> Result<(), Error>;

    /// Reads once from the socket, up to `recv_buffer_size` bytes.
    ///
    /// `timeout` bounds the read on blocking sockets; non-blocking sockets
    /// return immediately. A zero-length read means the peer shut down
    /// cleanly: the connection is closed as a side effect and the call
    /// fails with [`Error::ConnectionClosed`]. A timeout or would-block
    /// condition fails with [`Error::Communication`] and leaves the
    /// connection open.
    fn receive(&self, timeout: Duration) -> Result<Vec<u8>, Error>;

    /// Hands out a buffer for building an outgoing message.
    fn acquire_buffer(&self) -> Vec<u8>;

    /// Returns a buffer obtained from [`Channel::acquire_buffer`].
    fn release_buffer(&self, buffer: Vec<u8>);

    /// Closes the connection.
    ///
    /// Idempotent and callable from any thread: the first call shuts the
    /// socket down and schedules reclamation, later calls are no-ops. The
    /// descriptor itself is released when the last owner drops the
    /// connection.
    fn close(&self);
}

/// Where a connection's byte buffers come from.
///
/// Multi-threaded layers allocate per call so concurrent jobs never alias a
/// buffer. Single-threaded layers share one reused buffer through an owning
/// handle, so a poll cycle performs no large allocations.
#[derive(Debug, Clone)]
pub(crate) enum BufferSource {
    /// Allocate a fresh buffer of this size per acquire.
    PerCall(usize),
    /// Draw from a single reused buffer of at least `size` bytes.
    Shared {
        buffer: Arc<Mutex<Vec<u8>>>,
        size: usize,
    },
}

impl BufferSource {
    pub(crate) fn shared(size: usize) -> Self {
        BufferSource::Shared {
            buffer: Arc::new(Mutex::new(vec![0; size])),
            size,
        }
    }

    pub(crate) fn acquire(&self) -> Vec<u8> {
        match self {
            BufferSource::PerCall(size) => vec![0; *size],
            BufferSource::Shared { buffer, size } => {
                let mut taken = std::mem::take(&mut *buffer.lock().expect("buffer lock poisoned"));
                if taken.len() < *size {
                    taken.resize(*size, 0);
                }
                taken
            }
        }
    }

    pub(crate) fn release(&self, released: Vec<u8>) {
        match self {
            BufferSource::PerCall(_) => drop(released),
            BufferSource::Shared { buffer, .. } => {
                *buffer.lock().expect("buffer lock poisoned") = released;
            }
        }
    }
}

/// Outcome of a single read attempt, before connection state is touched.
pub(crate) enum ReadOutcome {
    /// Bytes arrived.
    Data(Vec<u8>),
    /// The read timed out or would have blocked; recoverable.
    WouldBlock,
    /// Orderly peer shutdown or a hard socket error; the caller must close
    /// the connection.
    Closed,
}

/// Sends the full buffer, continuing from the unsent offset on short
/// writes. Interrupted and would-block results are retried without backoff.
pub(crate) fn write_all<W: Write>(stream: &mut W, data: &[u8]) -> Result<(), Error> {
    let mut sent = 0;
    while sent < data.len() {
        match stream.write(&data[sent..]) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => sent += n,
            Err(err)
                if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock =>
            {
                continue;
            }
            Err(_) => return Err(Error::ConnectionClosed),
        }
    }
    Ok(())
}

/// Reads once into a buffer from `buffers` and classifies the result.
///
/// With a per-call source the filled buffer is handed to the caller; with a
/// shared source only the bytes actually read are copied out and the big
/// buffer goes back to the layer.
pub(crate) fn read_once<R: Read>(stream: &mut R, buffers: &BufferSource) -> ReadOutcome {
    let mut buf = buffers.acquire();
    match stream.read(&mut buf) {
        Ok(0) => {
            buffers.release(buf);
            ReadOutcome::Closed
        }
        Ok(n) => match buffers {
            BufferSource::PerCall(_) => {
                buf.truncate(n);
                ReadOutcome::Data(buf)
            }
            BufferSource::Shared { .. } => {
                let data = buf[..n].to_vec();
                buffers.release(buf);
                ReadOutcome::Data(data)
            }
        },
        Err(err)
            if err.kind() == ErrorKind::WouldBlock
                || err.kind() == ErrorKind::TimedOut
                || err.kind() == ErrorKind::Interrupted =>
        {
            buffers.release(buf);
            ReadOutcome::WouldBlock
        }
        Err(_) => {
            buffers.release(buf);
            ReadOutcome::Closed
        }
    }
}
