//! Deferred reclamation of closed connections.
//!
//! Closing a connection can happen on any worker thread, but freeing it may
//! only happen once no job referencing it is still in flight. The first
//! successful close pushes the connection onto this queue; the polling
//! thread drains it exactly once per cycle and decides when the drained
//! batch is released.

use crate::connection::ServerConnection;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

/// Multi-producer/single-consumer hand-off of closed connections.
///
/// Producers (any thread calling `close`) never block; the consumer side
/// lives on the polling thread and drains everything pushed since the
/// previous cycle in one non-racing step.
pub(crate) struct ReclaimQueue {
    producer: Sender<Arc<ServerConnection>>,
    consumer: Receiver<Arc<ServerConnection>>,
}

impl ReclaimQueue {
    pub(crate) fn new() -> Self {
        let (producer, consumer) = channel();
        Self { producer, consumer }
    }

    /// Handle given to every connection at construction; the first close
    /// sends the connection through it.
    pub(crate) fn producer(&self) -> Sender<Arc<ServerConnection>> {
        self.producer.clone()
    }

    /// Takes everything pushed since the previous drain. Call once per poll
    /// cycle, from the polling thread only.
    pub(crate) fn drain(&self) -> Vec<Arc<ServerConnection>> {
        self.consumer.try_iter().collect()
    }
}
