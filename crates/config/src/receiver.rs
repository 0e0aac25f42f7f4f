//! Receiver application configuration

use serde::Deserialize;
use std::time::Duration;

/// Receiver listener configuration
///
/// # Example
///
/// ```toml
/// [receiver]
/// address = "0.0.0.0"
/// port = 9100
/// idle_timeout = "60s"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Bind address
    /// Default: "0.0.0.0"
    pub address: String,

    /// Listen port (0 picks an ephemeral port)
    /// Default: 9100
    pub port: u16,

    /// Initial per-connection read buffer size
    /// Default: 256KB
    pub buffer_size: usize,

    /// Interval between published statistics snapshots
    /// Default: 10s
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// A sender silent for this long is considered dead
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Disable Nagle's algorithm on accepted connections
    /// Default: true
    pub nodelay: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 9100,
            buffer_size: 256 * 1024,
            stats_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            nodelay: true,
        }
    }
}

impl ReceiverConfig {
    /// Get the bind address as "address:port"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReceiverConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:9100");
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert!(config.nodelay);
    }

    #[test]
    fn test_deserialize() {
        let config: ReceiverConfig = toml::from_str(
            r#"
address = "127.0.0.1"
port = 0
stats_interval = "1s"
"#,
        )
        .unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:0");
        assert_eq!(config.stats_interval, Duration::from_secs(1));
    }
}
