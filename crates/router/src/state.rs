//! Observable topic and partition state

use std::collections::BTreeMap;
use std::fmt;

use feedline_protocol::{Checkpoint, PartitionId, TopicId};
use feedline_routing::Filter;
use parking_lot::Mutex;

use crate::metrics::RouterMetricsSnapshot;

/// Lifecycle of a topic on one router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicState {
    /// Validating and opening partitions
    Starting,
    /// Routing events
    Active,
    /// Removed from routing, pending batches being flushed
    Draining,
    /// Endpoint references released
    Stopped,
}

impl fmt::Display for TopicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Sub-state of a partition worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionState {
    /// Worker spawned, stream not yet polled
    Opening,
    /// Reading and routing events
    Streaming,
    /// Upstream diverged from the committed position, or routed data could
    /// not be delivered; events are dropped until the partition is reopened
    /// at a new checkpoint
    Paused,
    /// Worker stopped
    Closed,
}

/// Position and state of one partition worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStatus {
    pub partition: PartitionId,
    pub state: PartitionState,
    /// Checkpoint of the last accepted event
    pub position: Checkpoint,
    /// Checkpoint of the last flushed and acknowledged data
    pub committed: Checkpoint,
}

/// Shared status cell written by a worker, read by the control task
#[derive(Debug)]
pub(crate) struct PartitionCell {
    status: Mutex<PartitionStatus>,
}

impl PartitionCell {
    pub(crate) fn new(from: Checkpoint) -> Self {
        Self {
            status: Mutex::new(PartitionStatus {
                partition: from.partition,
                state: PartitionState::Opening,
                position: from,
                committed: from,
            }),
        }
    }

    pub(crate) fn get(&self) -> PartitionStatus {
        *self.status.lock()
    }

    pub(crate) fn set_state(&self, state: PartitionState) {
        self.status.lock().state = state;
    }

    pub(crate) fn set_position(&self, position: Checkpoint) {
        self.status.lock().position = position;
    }

    pub(crate) fn set_committed(&self, committed: Checkpoint) {
        self.status.lock().committed = committed;
    }

    pub(crate) fn reset(&self, from: Checkpoint) {
        let mut status = self.status.lock();
        status.state = PartitionState::Streaming;
        status.position = from;
        status.committed = from;
    }
}

/// Snapshot of one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStatus {
    pub topic: TopicId,
    pub state: TopicState,
    pub filters: Vec<Filter>,
    /// Watched collections per partition
    pub partitions: BTreeMap<PartitionId, Vec<String>>,
    /// Destinations holding an endpoint reference
    pub destinations: Vec<String>,
}

/// Router-wide statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    pub topics_active: usize,
    pub partitions_streaming: usize,
    pub partitions_paused: usize,
    pub endpoints: usize,
    pub metrics: RouterMetricsSnapshot,
}

/// Asynchronous events the operator should act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterNotice {
    /// Endpoint exhausted its delivery attempts; its batches are dropped
    EndpointDead {
        /// Every destination routed through the endpoint, across topics
        destinations: Vec<String>,
        address: String,
    },
    /// Upstream history diverged from the partition's position
    PartitionDiverged {
        partition: PartitionId,
        position: Checkpoint,
        upstream: Checkpoint,
    },
    /// Data past `committed` cannot be encoded for delivery; the partition
    /// is paused without committing it
    PartitionStalled {
        partition: PartitionId,
        committed: Checkpoint,
        reason: String,
    },
    /// Partition worker stopped
    PartitionClosed {
        partition: PartitionId,
        committed: Checkpoint,
    },
}
