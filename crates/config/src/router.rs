//! Stream router configuration

use serde::Deserialize;
use std::time::Duration;

/// Stream router configuration
///
/// # Example
///
/// ```toml
/// [router]
/// partition_count = 1024
/// batch_size = 500
/// flush_interval = "100ms"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    /// Size of the partition space; valid ids are `0..partition_count`
    /// Default: 1024
    pub partition_count: u16,

    /// Maximum number of concurrently running partition workers
    /// Default: 1024
    pub max_partitions: usize,

    /// Events per destination batch before a flush is forced
    /// Default: 500
    pub batch_size: usize,

    /// Maximum time events wait in a pending batch
    /// Default: 100ms
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Capacity of each worker's command channel
    /// Default: 64
    pub worker_channel_size: usize,

    /// Capacity of the control request channel
    /// Default: 256
    pub control_channel_size: usize,

    /// Upper bound on one control request round trip
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Buffered notices per subscriber before the oldest are dropped
    /// Default: 1024
    pub notice_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            partition_count: 1024,
            max_partitions: 1024,
            batch_size: 500,
            flush_interval: Duration::from_millis(100),
            worker_channel_size: 64,
            control_channel_size: 256,
            request_timeout: Duration::from_secs(30),
            notice_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.partition_count, 1024);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RouterConfig = toml::from_str(
            r#"
partition_count = 64
flush_interval = "250ms"
"#,
        )
        .unwrap();
        assert_eq!(config.partition_count, 64);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_partitions, 1024);
    }
}
