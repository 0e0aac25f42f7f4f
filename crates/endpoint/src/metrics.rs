//! Endpoint counters

use std::sync::atomic::{AtomicU64, Ordering};

use feedline_protocol::SenderStats;

/// Lock-free counters for one transport endpoint
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    /// Batches acknowledged by the receiver
    pub batches_sent: AtomicU64,

    /// Events in acknowledged batches
    pub events_sent: AtomicU64,

    /// Frame bytes of acknowledged batches
    pub bytes_sent: AtomicU64,

    /// Batches that exhausted their delivery attempts
    pub batches_failed: AtomicU64,

    /// Retried delivery attempts
    pub retries: AtomicU64,

    /// Nacks received
    pub nacks: AtomicU64,

    /// Successful connects
    pub reconnect_count: AtomicU64,

    /// Keep-alive frames written
    pub keepalives_sent: AtomicU64,

    /// Sends waiting in the queue
    pub queue_depth: AtomicU64,
}

impl EndpointMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            batches_sent: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            nacks: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
            keepalives_sent: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        }
    }

    /// Record an acknowledged batch
    #[inline]
    pub fn record_sent(&self, event_count: u64, byte_count: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.events_sent.fetch_add(event_count, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a batch that exhausted its attempts
    #[inline]
    pub fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retried attempt
    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a nack
    #[inline]
    pub fn record_nack(&self) {
        self.nacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful connect
    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a keep-alive frame
    #[inline]
    pub fn record_keepalive(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A send entered the queue
    #[inline]
    pub fn enqueued(&self) {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// A send left the queue
    #[inline]
    pub fn dequeued(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> EndpointMetricsSnapshot {
        EndpointMetricsSnapshot {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            nacks: self.nacks.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of endpoint metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointMetricsSnapshot {
    pub batches_sent: u64,
    pub events_sent: u64,
    pub bytes_sent: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub nacks: u64,
    pub reconnect_count: u64,
    pub keepalives_sent: u64,
    pub queue_depth: u64,
}

impl EndpointMetricsSnapshot {
    /// Statistics carried by keep-alive frames
    pub fn sender_stats(&self) -> SenderStats {
        SenderStats {
            batches_sent: self.batches_sent,
            events_sent: self.events_sent,
            bytes_sent: self.bytes_sent,
            queue_depth: u32::try_from(self.queue_depth).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = EndpointMetrics::new();
        metrics.record_sent(10, 500);
        metrics.record_sent(5, 100);
        metrics.record_retry();
        metrics.record_nack();
        metrics.enqueued();
        metrics.enqueued();
        metrics.dequeued();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_sent, 2);
        assert_eq!(snapshot.events_sent, 15);
        assert_eq!(snapshot.bytes_sent, 600);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.nacks, 1);
        assert_eq!(snapshot.queue_depth, 1);

        let stats = snapshot.sender_stats();
        assert_eq!(stats.events_sent, 15);
        assert_eq!(stats.queue_depth, 1);
    }
}
