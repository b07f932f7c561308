use thiserror::Error;

/// The error type for opcnet operations.
///
/// This is the single status domain for the whole transport layer. The
/// variants split along the recovery taxonomy: transient conditions
/// (interrupted syscalls, would-block on write) are retried internally and
/// never surface; [`Error::Communication`] is recoverable and leaves the
/// connection open; everything else that touches a connection is terminal
/// and closes it as a side effect.
#[derive(Error, Debug)]
pub enum Error {
    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is closed or was closed as a side effect of the
    /// failed operation.
    ///
    /// Raised on orderly peer shutdown (zero-length read), hard socket
    /// errors, and writes to a dead socket. Never retried.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A receive timed out or would have blocked.
    ///
    /// The connection remains open; the caller may retry on the next poll
    /// cycle.
    #[error("Communication error (receive timed out or would block)")]
    Communication,

    /// Internal error in the transport layer itself.
    ///
    /// Covers failures that are not attributable to the peer or the caller,
    /// such as toggling a descriptor's blocking mode.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The endpoint URL failed validation.
    ///
    /// No socket is created when this is returned; there is never a
    /// partially-initialized connection behind this error.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpointUrl {
        /// The URL as given by the caller.
        url: String,
        /// What the validation rejected.
        reason: &'static str,
    },

    /// Host name resolution yielded no usable address.
    #[error("Host name resolution for '{host}' yielded no address")]
    HostResolution {
        /// The host part of the endpoint URL.
        host: String,
    },

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
