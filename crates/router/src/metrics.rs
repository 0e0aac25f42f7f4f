//! Stream router metrics
//!
//! Atomic counters shared by the control task and every partition worker.
//! All operations use relaxed ordering; values are eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

/// Router-wide counters
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Events read from upstream streams
    events_received: AtomicU64,

    /// Events appended to at least one pending batch
    events_routed: AtomicU64,

    /// Events no topic filter selected
    events_unrouted: AtomicU64,

    /// Stale or duplicate events dropped
    events_stale: AtomicU64,

    /// Events dropped while a partition was paused
    events_paused: AtomicU64,

    /// Batches acknowledged by endpoints
    batches_sent: AtomicU64,

    /// Events in acknowledged batches
    events_sent: AtomicU64,

    /// Batches that failed to send
    send_failures: AtomicU64,

    /// Checkpoints committed after a flush
    checkpoints_committed: AtomicU64,

    /// Failed checkpoint store writes
    store_errors: AtomicU64,

    /// Partition streams opened (including reopens)
    partitions_opened: AtomicU64,

    /// Partition workers closed
    partitions_closed: AtomicU64,

    /// Divergences detected
    divergences: AtomicU64,

    /// Partitions paused on data that could not be delivered
    stalls: AtomicU64,
}

impl RouterMetrics {
    /// Create new metrics instance with all counters at zero
    #[inline]
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_routed: AtomicU64::new(0),
            events_unrouted: AtomicU64::new(0),
            events_stale: AtomicU64::new(0),
            events_paused: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            checkpoints_committed: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            partitions_opened: AtomicU64::new(0),
            partitions_closed: AtomicU64::new(0),
            divergences: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the routing outcome of an accepted event
    #[inline]
    pub fn record_routed(&self, routed: bool) {
        if routed {
            self.events_routed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_unrouted.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_stale(&self) {
        self.events_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_paused_drop(&self) {
        self.events_paused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acknowledged batch
    #[inline]
    pub fn record_sent(&self, event_count: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.events_sent.fetch_add(event_count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_commit(&self) {
        self.checkpoints_committed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_opened(&self) {
        self.partitions_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_closed(&self) {
        self.partitions_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_divergence(&self) {
        self.divergences.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters
    #[inline]
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_routed: self.events_routed.load(Ordering::Relaxed),
            events_unrouted: self.events_unrouted.load(Ordering::Relaxed),
            events_stale: self.events_stale.load(Ordering::Relaxed),
            events_paused: self.events_paused.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            checkpoints_committed: self.checkpoints_committed.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            partitions_opened: self.partitions_opened.load(Ordering::Relaxed),
            partitions_closed: self.partitions_closed.load(Ordering::Relaxed),
            divergences: self.divergences.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RouterMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterMetricsSnapshot {
    pub events_received: u64,
    pub events_routed: u64,
    pub events_unrouted: u64,
    pub events_stale: u64,
    pub events_paused: u64,
    pub batches_sent: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    pub checkpoints_committed: u64,
    pub store_errors: u64,
    pub partitions_opened: u64,
    pub partitions_closed: u64,
    pub divergences: u64,
    pub stalls: u64,
}
