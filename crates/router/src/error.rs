//! Router error types
//!
//! Control operations return [`RouterError`] synchronously. Errors local to a
//! partition worker (stale events, failed sends, store writes) are logged and
//! counted there and never reach the caller.

use std::path::PathBuf;

use feedline_config::ConfigError;
use feedline_protocol::{PartitionId, TopicId};
use feedline_routing::RoutingError;
use thiserror::Error;

/// Result type for router operations
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors returned by control operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Upstream does not own the partition here; re-resolve and retry
    #[error("partition {partition} is not available on this node")]
    PartitionUnavailable { partition: PartitionId },

    /// Partition id outside the configured partition space
    #[error("partition {partition} outside partition space of {partition_count}")]
    UnknownPartition {
        partition: PartitionId,
        partition_count: u16,
    },

    /// Filter definition rejected (conflicting or empty); filters unchanged
    #[error("filter rejected: {0}")]
    Conflict(#[from] RoutingError),

    /// Topic is not active on this router
    #[error("unknown topic: {0}")]
    UnknownTopic(TopicId),

    /// A filter routes to a destination missing from the topology
    #[error("unknown destination: {destination}")]
    UnknownDestination { destination: String },

    /// Topology failed validation
    #[error("invalid topology: {0}")]
    InvalidTopology(ConfigError),

    /// Opening the requested partitions would exceed `max_partitions`
    #[error("resource exhausted: {requested} partition workers requested, limit is {limit}")]
    ResourceExhausted { requested: usize, limit: usize },

    /// Upstream failed for a reason other than ownership
    #[error("upstream error: {0}")]
    Upstream(UpstreamError),

    /// Checkpoint store failed
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),

    /// Router control task has stopped
    #[error("router is closed")]
    RouterClosed,

    /// Request did not complete within `request_timeout`
    #[error("request timed out")]
    Timeout,
}

impl RouterError {
    /// Whether the caller should re-resolve partition ownership and retry
    pub fn is_partition_unavailable(&self) -> bool {
        matches!(self, Self::PartitionUnavailable { .. })
    }

    /// Whether the filters conflicted with the topic's current filters
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(RoutingError::Conflict { .. }))
    }
}

impl From<ConfigError> for RouterError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownDestination { destination } => {
                Self::UnknownDestination { destination }
            }
            other => Self::InvalidTopology(other),
        }
    }
}

impl From<UpstreamError> for RouterError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::PartitionUnavailable { partition } => {
                Self::PartitionUnavailable { partition }
            }
            other => Self::Upstream(other),
        }
    }
}

/// Errors from an upstream source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Partition is not owned by this upstream node
    #[error("partition {partition} is not owned by this node")]
    PartitionUnavailable { partition: PartitionId },

    /// Upstream could not be reached
    #[error("upstream unreachable: {message}")]
    Unreachable { message: String },
}

/// Errors from a checkpoint store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the store file failed
    #[error("failed to access checkpoint file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Store file content is not a valid checkpoint list
    #[error("invalid checkpoint file: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Create an Io error
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
