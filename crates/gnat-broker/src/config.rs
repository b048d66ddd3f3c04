//! Broker configuration

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{BrokerError, Result};

/// Broker configuration
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// name = "edge-1"
/// listen = "127.0.0.1:4222"
/// max_connections = 256
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Server name announced in `INFO`
    pub name: String,
    /// Listen address used by [`Broker::serve`](crate::Broker::serve) callers
    pub listen: String,
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,
    /// Per-connection argument and payload buffer capacity in bytes
    pub buffer_capacity: usize,
    /// How often the pong watcher checks for the initial PONG (milliseconds)
    pub pong_poll_interval_ms: u64,
    /// How long a client may take to answer the initial PING (milliseconds)
    pub pong_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: gnat_core::DEFAULT_SERVER_NAME.to_string(),
            listen: format!("0.0.0.0:{}", gnat_core::DEFAULT_PORT),
            max_connections: 1024,
            buffer_capacity: gnat_core::DEFAULT_BUFFER_CAPACITY,
            pong_poll_interval_ms: 100,
            pong_timeout_ms: 60_000,
        }
    }
}

impl BrokerConfig {
    /// Parse a configuration document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| BrokerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(BrokerError::Config(
                "buffer_capacity must be greater than zero".into(),
            ));
        }
        if self.pong_poll_interval_ms == 0 {
            return Err(BrokerError::Config(
                "pong_poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn pong_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pong_poll_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}
