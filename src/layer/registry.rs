//! Single-writer table of live connections.
//!
//! Only the polling thread mutates the registry; worker threads interact
//! with connections exclusively through the `Channel` capability surface.

use crate::config::ConnectionConfig;
use crate::connection::{BufferSource, ServerConnection};
use crate::error::Error;
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::warn;

/// Pairs a registered connection with its poll token.
pub(crate) struct ConnectionMapping {
    pub(crate) connection: Arc<ServerConnection>,
    pub(crate) token: usize,
}

#[derive(Default)]
pub(crate) struct Registry {
    mappings: Vec<ConnectionMapping>,
}

impl Registry {
    /// Builds a connection around an accepted stream, registers it for
    /// readiness and appends its mapping.
    ///
    /// If readiness registration fails, the stream is dropped on the spot —
    /// closing the descriptor — so no socket is ever left open and
    /// untracked.
    pub(crate) fn add(
        &mut self,
        poll: &mio::Registry,
        mut stream: TcpStream,
        token: usize,
        config: ConnectionConfig,
        buffers: BufferSource,
        reclaim: Sender<Arc<ServerConnection>>,
    ) -> Result<Arc<ServerConnection>, Error> {
        if let Err(err) = poll.register(&mut stream, Token(token), Interest::READABLE) {
            drop(stream);
            return Err(Error::Internal(format!(
                "failed to register accepted connection: {err}"
            )));
        }
        let connection = ServerConnection::new(token, stream, config, buffers, reclaim);
        self.mappings.push(ConnectionMapping {
            connection: Arc::clone(&connection),
            token,
        });
        Ok(connection)
    }

    /// Removes the mapping for `token` and returns its connection.
    ///
    /// A missing token is a silent no-op: duplicate removal requests are
    /// expected when a close races with the drain of an earlier cycle.
    pub(crate) fn remove(&mut self, token: usize) -> Option<Arc<ServerConnection>> {
        let index = self.mappings.iter().position(|m| m.token == token)?;
        Some(self.mappings.swap_remove(index).connection)
    }

    pub(crate) fn get(&self, token: usize) -> Option<&Arc<ServerConnection>> {
        self.mappings
            .iter()
            .find(|m| m.token == token)
            .map(|m| &m.connection)
    }

    pub(crate) fn connections(&self) -> impl Iterator<Item = &Arc<ServerConnection>> {
        self.mappings.iter().map(|m| &m.connection)
    }

    pub(crate) fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Drops every mapping. Used during teardown; connections still
    /// referenced by in-flight jobs stay alive through their own handles.
    pub(crate) fn clear(&mut self) {
        if !self.mappings.is_empty() {
            warn!(count = self.mappings.len(), "Dropping remaining connections");
        }
        self.mappings.clear();
    }
}
