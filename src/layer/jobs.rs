//! Units of work handed to the owning server.

use crate::connection::Channel;
use std::fmt;
use std::sync::Arc;

/// One discrete unit of work produced by a poll cycle.
///
/// Ownership of the batch and its payloads transfers to the caller;
/// connections are shared references, kept alive by the job for as long as
/// the job exists.
pub enum Job {
    /// Raw protocol message received on a connection, already passed
    /// through the frame-completion collaborator.
    BinaryMessage {
        connection: Arc<dyn Channel>,
        message: Vec<u8>,
    },
    /// The connection failed or was closed by the peer; the server must
    /// perform protocol-level teardown. The socket is usually already shut
    /// down, but not always, so teardown must still call
    /// [`Channel::close`].
    CloseConnection { connection: Arc<dyn Channel> },
    /// A callback the server must run only after the current cycle's other
    /// jobs have been dispatched. Used to release reclaimed connections at
    /// a safe scheduling boundary.
    DelayedMethodCall(DelayedCall),
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::BinaryMessage {
                connection,
                message,
            } => f
                .debug_struct("BinaryMessage")
                .field("connection", &connection.id())
                .field("len", &message.len())
                .finish(),
            Job::CloseConnection { connection } => f
                .debug_struct("CloseConnection")
                .field("connection", &connection.id())
                .finish(),
            Job::DelayedMethodCall(call) => fmt::Debug::fmt(call, f),
        }
    }
}

/// Deferred callback plus its captured payload.
pub struct DelayedCall {
    callback: Box<dyn FnOnce() + Send>,
    payload_size: usize,
}

impl DelayedCall {
    pub(crate) fn new(payload_size: usize, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            payload_size,
        }
    }

    /// Number of reclaimed connections the callback will release.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Runs the callback, consuming the payload.
    pub fn run(self) {
        (self.callback)();
    }
}

impl fmt::Debug for DelayedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedMethodCall")
            .field("payload_size", &self.payload_size)
            .finish()
    }
}
