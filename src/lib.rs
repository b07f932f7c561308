//! opcnet - TCP transport and connection-lifecycle layer
//!
//! opcnet is the transport layer beneath a request/response protocol
//! server. It owns the raw sockets, turns socket readiness into discrete
//! jobs for the owning server's worker pool, and manages the full lifecycle
//! of connections from accept to safe, deferred destruction.
//!
//! The owning server drives the layer in a loop:
//!
//! ```no_run
//! use opcnet::{NetworkLayer, Job};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), opcnet::Error> {
//! let config = config::Config::builder()
//!     .set_default("port", 4840)?
//!     .build()?;
//! let mut layer = NetworkLayer::new(&config)?;
//! layer.start()?;
//! loop {
//!     for job in layer.poll(Duration::from_millis(10))? {
//!         match job {
//!             Job::BinaryMessage { connection, message } => { /* dispatch */ }
//!             Job::CloseConnection { connection } => { /* protocol teardown */ }
//!             Job::DelayedMethodCall(call) => call.run(),
//!         }
//!     }
//! }
//! # }
//! ```
//!
//! Message framing, job scheduling and payload interpretation are external
//! collaborators; see [`FrameAssembler`] for the framing seam.

// Internal-only modules
pub(crate) mod config;
pub(crate) mod connection;
pub(crate) mod error;
pub(crate) mod framing;
pub(crate) mod layer;

// These are the intended public API
pub use config::{ConnectionConfig, LayerConfig};
pub use connection::{Channel, ClientConnection, ConnectionState, ServerConnection};
pub use error::Error;
pub use framing::{FrameAssembler, Passthrough};
pub use layer::{DelayedCall, Job, NetworkLayer};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::{ConnectionConfig, LayerConfig};
    pub use crate::connection::{Channel, ClientConnection, ConnectionState, ServerConnection};
    pub use crate::error::Error;
    pub use crate::framing::{FrameAssembler, Passthrough};
    pub use crate::layer::{DelayedCall, Job, NetworkLayer};
}
