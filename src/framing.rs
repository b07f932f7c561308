//! Frame-completion seam.
//!
//! Reassembling protocol messages from raw bytes is not this layer's job.
//! The poll cycle passes every successful receive through a
//! [`FrameAssembler`] before a `BinaryMessage` job is produced; what the
//! assembler does with chunk headers or partial frames is opaque here.

use crate::connection::Channel;

/// External collaborator that turns raw received bytes into reassembled
/// protocol messages.
///
/// The connection is passed along so an implementation can keep per
/// connection reassembly state and honor the connection's
/// `max_message_size` and `max_chunk_count`.
pub trait FrameAssembler: Send {
    /// Feeds bytes received on `connection`.
    ///
    /// Returns the reassembled message, or `None` when more bytes are
    /// required; in that case no job is produced for this receive and the
    /// bytes stay with the assembler.
    fn complete(&mut self, connection: &dyn Channel, data: Vec<u8>) -> Option<Vec<u8>>;
}

/// Assembler that treats every receive as one complete message.
#[derive(Debug, Default)]
pub struct Passthrough;

impl FrameAssembler for Passthrough {
    fn complete(&mut self, _connection: &dyn Channel, data: Vec<u8>) -> Option<Vec<u8>> {
        Some(data)
    }
}
