//! Endpoint settings

use std::time::Duration;

use feedline_config::TcpDestinationConfig;

/// Configuration for one transport endpoint
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Receiver address (host:port)
    pub address: String,

    /// Bounded send queue size
    pub queue_size: usize,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Write timeout per frame
    pub write_timeout: Duration,

    /// Time to wait for an ack
    pub ack_timeout: Duration,

    /// Delivery attempts per batch
    pub retry_attempts: usize,

    /// Backoff before the first retry
    pub retry_interval: Duration,

    /// Backoff cap
    pub max_backoff: Duration,

    /// Interval between keep-alive frames
    pub keepalive_interval: Duration,

    /// Interval between stats log lines
    pub stats_interval: Duration,

    /// TCP keep-alive probe interval, `None` to disable
    pub tcp_keepalive: Option<Duration>,
}

impl EndpointConfig {
    /// Create a config for `address` with default settings
    pub fn new(address: impl Into<String>) -> Self {
        Self::from(&TcpDestinationConfig::new(address))
    }

    /// Set the send queue size
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }

    /// Set connection timeout
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set write timeout
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set ack timeout
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set retry attempts
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Set the initial retry backoff and its cap
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_interval = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Set keep-alive frame interval
    #[must_use]
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set stats reporting interval
    #[must_use]
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Set or disable TCP keep-alive
    #[must_use]
    pub fn with_tcp_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.tcp_keepalive = interval;
        self
    }

    /// Backoff before retry number `retry` (1-based): doubled per retry,
    /// capped at `max_backoff`
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX).min(31);
        self.retry_interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl From<&TcpDestinationConfig> for EndpointConfig {
    fn from(config: &TcpDestinationConfig) -> Self {
        Self {
            address: config.address.clone(),
            queue_size: config.queue_size.max(1),
            connection_timeout: config.connection_timeout,
            write_timeout: config.write_timeout,
            ack_timeout: config.ack_timeout,
            retry_attempts: config.retry_attempts.max(1),
            retry_interval: config.retry_interval,
            max_backoff: config.max_backoff,
            keepalive_interval: config.keepalive_interval,
            stats_interval: config.stats_interval,
            tcp_keepalive: config.tcp_keepalive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_destination_config() {
        let config = EndpointConfig::new("localhost:9100");
        assert_eq!(config.address, "localhost:9100");
        assert_eq!(config.queue_size, 64);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_builder() {
        let config = EndpointConfig::new("h:1")
            .with_queue_size(0)
            .with_retry_attempts(0)
            .with_ack_timeout(Duration::from_millis(50))
            .with_tcp_keepalive(None);
        assert_eq!(config.queue_size, 1);
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.ack_timeout, Duration::from_millis(50));
        assert_eq!(config.tcp_keepalive, None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = EndpointConfig::new("h:1")
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(100), Duration::from_millis(350));
    }
}
