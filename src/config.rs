//! Layer and per-connection configuration.
//!
//! All settings are read from a [`config::Config`] with optional
//! namespacing: `{name}.{key}` is tried first and falls back to the bare
//! `{key}`, so several layers can share one configuration source.

use ::config::Config;

/// Buffer configuration applied to every connection at construction.
///
/// Visible to both the raw socket operations (receive sizes its buffer from
/// `recv_buffer_size`) and the frame-completion collaborator
/// (`max_message_size`, `max_chunk_count` bound reassembly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Size of the buffer a single receive reads into.
    pub recv_buffer_size: usize,
    /// Upper bound on a reassembled message.
    pub max_message_size: usize,
    /// Upper bound on the number of chunks per message.
    pub max_chunk_count: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 64 * 1024,
            max_message_size: 64 * 1024,
            max_chunk_count: 1,
        }
    }
}

/// Settings of the network layer itself.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Port the listening socket binds to. 0 lets the OS choose.
    pub port: u16,
    /// Capacity of the readiness event buffer.
    pub poll_capacity: usize,
    /// Whether jobs are consumed by worker threads concurrently.
    ///
    /// When false the layer runs in the cooperative single-threaded mode:
    /// one reused receive buffer and synchronous freeing of closed
    /// connections.
    pub threaded: bool,
    /// Per-connection buffer configuration.
    pub connection: ConnectionConfig,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            poll_capacity: DEFAULT_POLL_CAPACITY,
            threaded: true,
            connection: ConnectionConfig::default(),
        }
    }
}

pub(crate) const DEFAULT_POLL_CAPACITY: usize = 1024;

impl ConnectionConfig {
    /// Reads a connection configuration from `config`, with `name` as the
    /// lookup namespace. Missing keys fall back to the defaults.
    pub fn from_config(config: &Config, name: &str) -> Self {
        let defaults = Self::default();
        Self {
            recv_buffer_size: get_namespaced_usize(config, name, "recv_buffer_size")
                .unwrap_or(defaults.recv_buffer_size),
            max_message_size: get_namespaced_usize(config, name, "max_message_size")
                .unwrap_or(defaults.max_message_size),
            max_chunk_count: get_namespaced_usize(config, name, "max_chunk_count")
                .unwrap_or(defaults.max_chunk_count),
        }
    }
}

impl LayerConfig {
    /// Reads a layer configuration from `config`, with `name` as the lookup
    /// namespace. Missing keys fall back to the defaults.
    pub fn from_config(config: &Config, name: &str) -> Self {
        let defaults = Self::default();
        Self {
            port: get_namespaced_u16(config, name, "port").unwrap_or(defaults.port),
            poll_capacity: get_namespaced_usize(config, name, "poll_capacity")
                .unwrap_or(defaults.poll_capacity),
            threaded: get_namespaced_bool(config, name, "threaded").unwrap_or(defaults.threaded),
            connection: ConnectionConfig::from_config(config, name),
        }
    }
}

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

pub(crate) fn get_namespaced_u16(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u16, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u16>(key))
}

pub(crate) fn get_namespaced_bool(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<bool, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<bool>(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_config(pairs: &[(&str, i64)]) -> Config {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_default(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn connection_config_defaults_apply() {
        let config = build_config(&[]);
        let conn = ConnectionConfig::from_config(&config, "");
        assert_eq!(conn, ConnectionConfig::default());
    }

    #[test]
    fn namespaced_key_wins_over_bare_key() {
        let config = build_config(&[
            ("recv_buffer_size", 1024),
            ("server_a.recv_buffer_size", 4096),
        ]);
        let plain = ConnectionConfig::from_config(&config, "");
        let named = ConnectionConfig::from_config(&config, "server_a");
        assert_eq!(plain.recv_buffer_size, 1024);
        assert_eq!(named.recv_buffer_size, 4096);
    }

    #[test]
    fn bare_key_is_fallback_for_missing_namespace() {
        let config = build_config(&[("max_message_size", 8192)]);
        let named = ConnectionConfig::from_config(&config, "server_b");
        assert_eq!(named.max_message_size, 8192);
    }
}
