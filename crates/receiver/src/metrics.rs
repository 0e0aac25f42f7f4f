//! Receiver counters and published statistics

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use feedline_protocol::SenderStats;

/// Lock-free counters shared by every connection of one receiver
#[derive(Debug, Default)]
pub struct ReceiverMetrics {
    /// Currently open connections
    pub connections_active: AtomicU64,

    /// Connections accepted since start
    pub connections_total: AtomicU64,

    /// Batch frames decoded
    pub batches_received: AtomicU64,

    /// Events in decoded batches
    pub events_received: AtomicU64,

    /// Bytes read from sockets
    pub bytes_received: AtomicU64,

    /// Batches the handler accepted
    pub batches_acked: AtomicU64,

    /// Batches rejected by the handler or malformed
    pub batches_nacked: AtomicU64,

    /// Frames that failed to decode
    pub frames_malformed: AtomicU64,

    /// Keep-alive frames received
    pub keepalives_received: AtomicU64,

    /// Connections closed for idleness
    pub idle_disconnects: AtomicU64,
}

impl ReceiverMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            connections_active: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            batches_received: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            batches_acked: AtomicU64::new(0),
            batches_nacked: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            keepalives_received: AtomicU64::new(0),
            idle_disconnects: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_read(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a decoded batch and the handler's verdict
    #[inline]
    pub fn batch_handled(&self, events: u64, accepted: bool) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.events_received.fetch_add(events, Ordering::Relaxed);
        if accepted {
            self.batches_acked.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_nacked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a frame that failed to decode; malformed batches are nacked
    #[inline]
    pub fn frame_malformed(&self, nacked: bool) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
        if nacked {
            self.batches_nacked.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn keepalive(&self) {
        self.keepalives_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn idle_disconnect(&self) {
        self.idle_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot, attaching the senders' last reports
    pub fn snapshot(&self, senders: BTreeMap<SocketAddr, SenderStats>) -> ReceiverStats {
        ReceiverStats {
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            batches_acked: self.batches_acked.load(Ordering::Relaxed),
            batches_nacked: self.batches_nacked.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            keepalives_received: self.keepalives_received.load(Ordering::Relaxed),
            idle_disconnects: self.idle_disconnects.load(Ordering::Relaxed),
            senders,
        }
    }
}

/// Received-statistics snapshot published every `stats_interval`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub connections_active: u64,
    pub connections_total: u64,
    pub batches_received: u64,
    pub events_received: u64,
    pub bytes_received: u64,
    pub batches_acked: u64,
    pub batches_nacked: u64,
    pub frames_malformed: u64,
    pub keepalives_received: u64,
    pub idle_disconnects: u64,
    /// Last statistics reported by each connected sender
    pub senders: BTreeMap<SocketAddr, SenderStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_verdicts() {
        let metrics = ReceiverMetrics::new();
        metrics.batch_handled(3, true);
        metrics.batch_handled(2, false);
        metrics.frame_malformed(true);
        metrics.frame_malformed(false);

        let stats = metrics.snapshot(BTreeMap::new());
        assert_eq!(stats.batches_received, 2);
        assert_eq!(stats.events_received, 5);
        assert_eq!(stats.batches_acked, 1);
        assert_eq!(stats.batches_nacked, 2);
        assert_eq!(stats.frames_malformed, 2);
    }

    #[test]
    fn test_connection_gauge() {
        let metrics = ReceiverMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let stats = metrics.snapshot(BTreeMap::new());
        assert_eq!(stats.connections_active, 1);
        assert_eq!(stats.connections_total, 2);
    }
}
