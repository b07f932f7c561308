use super::{read_once, write_all, BufferSource, Channel, ConnectionState, ReadOutcome};
use crate::config::ConnectionConfig;
use crate::error::Error;
use mio::net::TcpStream;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// A connection accepted by the network layer.
///
/// The stream is non-blocking (the layer only touches it after readiness),
/// so `receive` returns immediately and a would-block result is surfaced as
/// the recoverable [`Error::Communication`].
///
/// `close` may be called from any worker thread at any time. The first call
/// wins an atomic state swap, shuts the socket down and hands the
/// connection to the layer's reclaim queue; the descriptor is released once
/// the last `Arc` drops.
pub struct ServerConnection {
    id: usize,
    stream: TcpStream,
    state: AtomicU8,
    config: ConnectionConfig,
    buffers: BufferSource,
    reclaim: Sender<Arc<ServerConnection>>,
    weak_self: Weak<ServerConnection>,
}

impl ServerConnection {
    pub(crate) fn new(
        id: usize,
        stream: TcpStream,
        config: ConnectionConfig,
        buffers: BufferSource,
        reclaim: Sender<Arc<ServerConnection>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id,
            stream,
            state: AtomicU8::new(ConnectionState::Opening as u8),
            config,
            buffers,
            reclaim,
            weak_self: weak_self.clone(),
        })
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.stream.peer_addr()?)
    }
}

impl Channel for ServerConnection {
    fn id(&self) -> usize {
        self.id
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Opening as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn write(&self, data: &[u8]) -> Result<(), Error> {
        trace!(id = self.id, len = data.len(), "Writing to connection");
        write_all(&mut &self.stream, data)
    }

    fn receive(&self, _timeout: Duration) -> Result<Vec<u8>, Error> {
        // The stream is non-blocking; the timeout never applies here.
        match read_once(&mut &self.stream, &self.buffers) {
            ReadOutcome::Data(data) => Ok(data),
            ReadOutcome::WouldBlock => Err(Error::Communication),
            ReadOutcome::Closed => {
                self.close();
                Err(Error::ConnectionClosed)
            }
        }
    }

    fn acquire_buffer(&self) -> Vec<u8> {
        self.buffers.acquire()
    }

    fn release_buffer(&self, buffer: Vec<u8>) {
        self.buffers.release(buffer);
    }

    fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            // Lost the race or already closed; nothing more to do.
            return;
        }

        debug!(id = self.id, "Closing connection");
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            // The peer may already be gone; shutdown failure is not fatal.
            trace!(id = self.id, ?err, "Socket shutdown failed");
        }
        if let Some(connection) = self.weak_self.upgrade() {
            // Fails only when the layer side of the queue is gone, in which
            // case dropping `connection` releases the descriptor right here.
            let _ = self.reclaim.send(connection);
        }
    }
}
