use super::{read_once, write_all, BufferSource, Channel, ConnectionState, ReadOutcome};
use crate::config::ConnectionConfig;
use crate::error::Error;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Literal scheme every endpoint URL must carry.
const SCHEME: &str = "opc.tcp://";
/// Shortest acceptable endpoint URL, scheme plus a one-character host.
const MIN_URL_LEN: usize = 11;
/// Longest acceptable endpoint URL.
const MAX_URL_LEN: usize = 511;

/// An outbound connection initiated by [`ClientConnection::connect`].
///
/// Exposes the same capability surface as a server-accepted connection, but
/// the socket deliberately stays in blocking mode: `receive` bounds its
/// blocking read with a per-call timeout instead of readiness polling.
#[derive(Debug)]
pub struct ClientConnection {
    stream: TcpStream,
    state: AtomicU8,
    config: ConnectionConfig,
    /// Fresh buffer per receive, sized by `recv_buffer_size`.
    recv_buffers: BufferSource,
    /// One reused buffer for outgoing message assembly.
    send_buffers: BufferSource,
}

impl ClientConnection {
    /// Parses `endpoint_url`, resolves the host and performs a blocking
    /// connect to the first resolved address, without retry.
    ///
    /// Any validation or connect failure returns an error and leaves no
    /// socket behind.
    pub fn connect(config: ConnectionConfig, endpoint_url: &str) -> Result<Self, Error> {
        let (host, port) = match parse_endpoint_url(endpoint_url) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(url = endpoint_url, %err, "Rejecting endpoint URL");
                return Err(err);
            }
        };

        let addr = resolve(&host, port)?;
        debug!(url = endpoint_url, %addr, "Connecting");
        let stream = TcpStream::connect(addr)?;
        info!(url = endpoint_url, %addr, "Connected");

        // Unlike accepted sockets, the client socket stays blocking.
        Ok(Self {
            stream,
            state: AtomicU8::new(ConnectionState::Opening as u8),
            config,
            recv_buffers: BufferSource::PerCall(config.recv_buffer_size),
            send_buffers: BufferSource::shared(config.max_message_size),
        })
    }

    /// Toggles the descriptor's blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), Error> {
        self.stream
            .set_nonblocking(nonblocking)
            .map_err(|err| Error::Internal(format!("failed to toggle blocking mode: {err}")))
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.stream.peer_addr()?)
    }
}

impl Channel for ClientConnection {
    fn id(&self) -> usize {
        // Client connections exist outside any layer's token space.
        0
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
        write_all(&mut &self.stream, data)
    }

    fn receive(&self, timeout: Duration) -> Result<Vec<u8>, Error> {
        // A zero timeout means block until data arrives.
        let timeout = (!timeout.is_zero()).then_some(timeout);
        self.stream
            .set_read_timeout(timeout)
            .map_err(|err| Error::Internal(format!("failed to set receive timeout: {err}")))?;

        match read_once(&mut &self.stream, &self.recv_buffers) {
            ReadOutcome::Data(data) => Ok(data),
            ReadOutcome::WouldBlock => Err(Error::Communication),
            ReadOutcome::Closed => {
                self.close();
                Err(Error::ConnectionClosed)
            }
        }
    }

    fn acquire_buffer(&self) -> Vec<u8> {
        self.send_buffers.acquire()
    }

    fn release_buffer(&self, buffer: Vec<u8>) {
        self.send_buffers.release(buffer);
    }

    fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return;
        }
        debug!("Closing client connection");
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Validates the URL grammar `opc.tcp://host:port` and extracts host and
/// port. Overall length must be within 11–511 characters, the port numeric
/// and non-zero.
fn parse_endpoint_url(url: &str) -> Result<(String, u16), Error> {
    let invalid = |reason: &'static str| Error::InvalidEndpointUrl {
        url: url.to_string(),
        reason,
    };

    if url.len() < MIN_URL_LEN || url.len() > MAX_URL_LEN {
        return Err(invalid("length must be between 11 and 511 characters"));
    }
    let rest = url
        .strip_prefix(SCHEME)
        .ok_or_else(|| invalid("scheme must be opc.tcp://"))?;
    let (host, port) = rest.split_once(':').ok_or_else(|| invalid("missing port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("port must be numeric"))?;
    if port == 0 {
        return Err(invalid("port must be non-zero"));
    }
    Ok((host.to_string(), port))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let no_address = || Error::HostResolution {
        host: host.to_string(),
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|_| no_address())?
        .next()
        .ok_or_else(no_address)
}
