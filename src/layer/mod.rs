//! The server-side network layer: readiness polling, connection lifecycle
//! and job production.
//!
//! The owning server drives the layer by calling [`NetworkLayer::poll`] in
//! a loop. One cycle drains pending closures, waits for readiness, accepts
//! at most one inbound connection and returns the batch of jobs produced
//! from the ready sockets.

mod jobs;
mod reclaim;
mod registry;

pub use jobs::{DelayedCall, Job};

use crate::config::LayerConfig;
use crate::connection::{BufferSource, Channel, ServerConnection};
use crate::error::Error;
use crate::framing::{FrameAssembler, Passthrough};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use reclaim::ReclaimQueue;
use registry::Registry;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

const LISTENER: Token = Token(0);

// Connection tokens start well above the listener token so a stale event
// can never be mistaken for an accept.
const CONNECTION_TOKEN_START: usize = 1000;

/// TCP network layer beneath a request/response protocol server.
///
/// Owns the listening socket, all accepted connections and the reclaim
/// queue. All methods must be called from the single polling thread;
/// worker threads only ever touch connections through [`Channel`].
pub struct NetworkLayer {
    config: LayerConfig,
    poll: Poll,
    listener: Option<TcpListener>,
    registry: Registry,
    reclaim: ReclaimQueue,
    buffers: BufferSource,
    assembler: Box<dyn FrameAssembler>,
    next_token: usize,
    /// The listen backlog held more connections than the one accepted last
    /// cycle; try again next cycle without waiting for a new event.
    accept_pending: bool,
    /// Connections whose last receive filled the whole buffer; readiness is
    /// edge-triggered, so already-buffered bytes produce no new event and
    /// these sockets are re-read next cycle.
    pending_reads: Vec<usize>,
}

// ============================================================================
// Constructors
// ============================================================================

impl NetworkLayer {
    /// Creates a layer from configuration.
    ///
    /// # Configuration Keys
    ///
    /// - `port`: listening port (0 lets the OS choose)
    /// - `recv_buffer_size`, `max_message_size`, `max_chunk_count`
    /// - `poll_capacity`: readiness event buffer capacity
    /// - `threaded`: whether jobs are consumed by concurrent workers
    pub fn new(config: &::config::Config) -> Result<Self, Error> {
        Self::new_named(config, "")
    }

    /// Creates a named layer; configuration keys are looked up as
    /// `{name}.{key}` first, then `{key}`.
    pub fn new_named(config: &::config::Config, name: &str) -> Result<Self, Error> {
        Self::with_layer_config(LayerConfig::from_config(config, name))
    }

    /// Creates a layer from an already-built [`LayerConfig`].
    pub fn with_layer_config(config: LayerConfig) -> Result<Self, Error> {
        let buffers = if config.threaded {
            BufferSource::PerCall(config.connection.recv_buffer_size)
        } else {
            // One reused buffer serves both receives and outgoing message
            // assembly in the cooperative mode.
            BufferSource::shared(
                config
                    .connection
                    .recv_buffer_size
                    .max(config.connection.max_message_size),
            )
        };
        Ok(Self {
            config,
            poll: Poll::new()?,
            listener: None,
            registry: Registry::default(),
            reclaim: ReclaimQueue::new(),
            buffers,
            assembler: Box::new(Passthrough),
            next_token: CONNECTION_TOKEN_START,
            accept_pending: false,
            pending_reads: Vec::new(),
        })
    }

    /// Replaces the frame-completion collaborator (defaults to
    /// [`Passthrough`]).
    pub fn with_assembler(mut self, assembler: Box<dyn FrameAssembler>) -> Self {
        self.assembler = assembler;
        self
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl NetworkLayer {
    /// Opens, binds and listens the server socket on the configured port
    /// and registers it for readiness.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let mut listener = TcpListener::bind(addr)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        info!(local_addr = %listener.local_addr()?, "Listening for connections");
        self.listener = Some(listener);
        Ok(())
    }

    /// Runs one poll cycle: drain pending closures, wait up to `timeout`
    /// for readiness, accept at most one inbound connection and return the
    /// job batch.
    ///
    /// An idle cycle returns an empty batch.
    #[instrument(skip(self))]
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<Job>, Error> {
        // Drain closures first so a closed socket is never part of the
        // readiness set observed by this cycle.
        let drained = self.drain_closed();

        let mut events = Events::with_capacity(self.config.poll_capacity);
        self.poll.poll(&mut events, Some(timeout))?;

        let mut jobs = Vec::new();

        // Bounded per-cycle acceptance latency: one accept per cycle, the
        // rest of the backlog waits for the next one.
        let listener_ready =
            self.accept_pending || events.iter().any(|event| event.token() == LISTENER);
        if listener_ready {
            self.accept_pending = self.accept_one()?;
        }

        let retries = std::mem::take(&mut self.pending_reads);
        for event in events.iter() {
            let Token(token) = event.token();
            if token != LISTENER.0 {
                self.produce_for_ready(token, &mut jobs, false);
            }
        }
        for token in retries {
            if events.iter().all(|event| event.token() != Token(token)) {
                self.produce_for_ready(token, &mut jobs, true);
            }
        }

        if !drained.is_empty() {
            if self.config.threaded {
                // The callback runs after this cycle's jobs are dispatched
                // and releases the layer's references. Jobs hold their own
                // handles, so connections referenced by still-running work
                // outlive this release.
                let batch = drained;
                jobs.push(Job::DelayedMethodCall(DelayedCall::new(
                    batch.len(),
                    move || drop(batch),
                )));
            }
            // Cooperative mode: `drained` drops here, freeing immediately.
        }

        debug!(count = jobs.len(), "Produced jobs");
        Ok(jobs)
    }

    /// Stops accepting and emits one `CloseConnection` job per still-live
    /// connection. The layer remains valid for [`NetworkLayer::teardown`].
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> Vec<Job> {
        let _ = self.drain_closed();
        if let Some(mut listener) = self.listener.take() {
            let _ = self.poll.registry().deregister(&mut listener);
            info!("Stopped listening");
        }
        self.registry
            .connections()
            .map(|connection| Job::CloseConnection {
                connection: Arc::clone(connection) as Arc<dyn Channel>,
            })
            .collect()
    }

    /// Releases all layer resources. Valid only after [`NetworkLayer::stop`].
    ///
    /// Connections still referenced by in-flight jobs stay alive through
    /// those references; everything owned solely by the layer is dropped
    /// here.
    pub fn teardown(mut self) {
        let _ = self.drain_closed();
        self.registry.clear();
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl NetworkLayer {
    /// Local address of the listening socket, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }

    /// Discovery URL of the form `opc.tcp://<addr>:<port>`, once started.
    pub fn discovery_url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("opc.tcp://{addr}"))
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

// ============================================================================
// Internal cycle steps
// ============================================================================

impl NetworkLayer {
    /// Drains the reclaim queue and removes the corresponding mappings.
    fn drain_closed(&mut self) -> Vec<Arc<ServerConnection>> {
        let drained = self.reclaim.drain();
        for connection in &drained {
            self.registry.remove(connection.id());
            trace!(id = connection.id(), "Unmapped closed connection");
        }
        drained
    }

    /// Accepts at most one pending inbound connection and registers it.
    ///
    /// Returns whether the backlog may hold more connections.
    fn accept_one(&mut self) -> Result<bool, Error> {
        let Some(listener) = &self.listener else {
            return Ok(false);
        };
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                // Streams from mio's accept are already non-blocking.
                if let Err(err) = stream.set_nodelay(true) {
                    trace!(%peer_addr, ?err, "Failed to disable send coalescing");
                }
                let token = self.next_token;
                match self.registry.add(
                    self.poll.registry(),
                    stream,
                    token,
                    self.config.connection,
                    self.buffers.clone(),
                    self.reclaim.producer(),
                ) {
                    Ok(_) => {
                        self.next_token += 1;
                        info!(token, %peer_addr, "Accepted connection");
                    }
                    Err(err) => {
                        // The socket was closed by the failed add; nothing
                        // is left open and untracked.
                        warn!(%peer_addr, %err, "Failed to register accepted connection");
                    }
                }
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                // Backlog empty; spurious or already-drained readiness.
                Ok(false)
            }
            Err(err)
                if err.kind() == ErrorKind::Interrupted
                    || err.kind() == ErrorKind::ConnectionAborted
                    || err.kind() == ErrorKind::ConnectionReset =>
            {
                warn!(?err, "Transient accept error");
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Turns one ready connection socket into a job, if any.
    ///
    /// `speculative` marks a retry for a socket that may still hold
    /// buffered bytes from an earlier cycle; a would-block there only means
    /// the guess was wrong, not that anything failed.
    fn produce_for_ready(&mut self, token: usize, jobs: &mut Vec<Job>, speculative: bool) {
        // Tokens drained earlier this cycle (or merged duplicate events)
        // no longer resolve and are skipped.
        let Some(connection) = self.registry.get(token) else {
            trace!(token, "Skipping event for unmapped token");
            return;
        };
        let connection = Arc::clone(connection);

        match connection.receive(Duration::ZERO) {
            Ok(data) => {
                // A read that filled the buffer may have left bytes behind;
                // no new readiness edge will announce them.
                if data.len() >= connection.config().recv_buffer_size {
                    self.pending_reads.push(token);
                }
                if let Some(message) = self.assembler.complete(connection.as_ref(), data) {
                    jobs.push(Job::BinaryMessage {
                        connection,
                        message,
                    });
                }
            }
            Err(Error::Communication) if speculative => {
                trace!(token, "No buffered bytes left");
            }
            Err(err) => {
                // Terminal receives already closed the socket; the job
                // tells the server to tear down the protocol state above it.
                debug!(token, %err, "Receive failed, scheduling close");
                jobs.push(Job::CloseConnection { connection });
            }
        }
    }
}
