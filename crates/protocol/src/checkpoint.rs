//! Partition resume positions
//!
//! A `Checkpoint` names a point in one partition's change history: the
//! history branch (`epoch`) and the sequence number within it. Partition
//! workers compare incoming events against their current checkpoint to drop
//! stale or duplicate events, and the router persists checkpoints so streams
//! can be restarted exactly where they left off.
//!
//! # Epochs
//!
//! An upstream partition's history is reset when ownership fails over; the
//! new history gets a new epoch and sequence numbers restart. Sequence
//! numbers from different epochs cannot be compared, so such checkpoints are
//! reported as [`CheckpointOrder::Diverged`].
//!
//! Epoch `0` is reserved for "not pinned yet": a checkpoint that starts at the
//! beginning of retained history, before any event has been seen. It compares
//! by sequence number only and adopts the epoch of the first event it
//! advances to.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Partition identifier within the fixed-size partition space
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PartitionId(u16);

impl PartitionId {
    /// Create a partition ID
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the numeric partition number
    #[inline]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p:{}", self.0)
    }
}

impl From<u16> for PartitionId {
    #[inline]
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

/// Epoch value meaning "history branch not pinned yet"
pub const UNPINNED_EPOCH: u64 = 0;

/// Resume position for one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Partition this position belongs to
    pub partition: PartitionId,
    /// History branch identifier
    pub epoch: u64,
    /// Sequence number within the epoch
    pub seqno: u64,
}

/// Relative order of two checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOrder {
    /// Left side precedes right side
    Before,
    /// Same position
    Equal,
    /// Left side follows right side
    After,
    /// Different history branches (or partitions); needs a full resync
    Diverged,
}

impl Checkpoint {
    /// Create a checkpoint
    #[inline]
    #[must_use]
    pub const fn new(partition: PartitionId, epoch: u64, seqno: u64) -> Self {
        Self {
            partition,
            epoch,
            seqno,
        }
    }

    /// Beginning of retained history for a partition
    #[inline]
    #[must_use]
    pub const fn beginning(partition: PartitionId) -> Self {
        Self::new(partition, UNPINNED_EPOCH, 0)
    }

    /// Whether this checkpoint has not been pinned to an epoch
    #[inline]
    pub const fn is_unpinned(&self) -> bool {
        self.epoch == UNPINNED_EPOCH
    }

    /// Order `self` relative to `other`
    pub fn compare(&self, other: &Checkpoint) -> CheckpointOrder {
        if self.partition != other.partition {
            return CheckpointOrder::Diverged;
        }
        if !self.is_unpinned() && !other.is_unpinned() && self.epoch != other.epoch {
            return CheckpointOrder::Diverged;
        }
        match self.seqno.cmp(&other.seqno) {
            Ordering::Less => CheckpointOrder::Before,
            Ordering::Equal => CheckpointOrder::Equal,
            Ordering::Greater => CheckpointOrder::After,
        }
    }

    /// Move to `seqno` within the current epoch
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Regression` if `seqno` is lower than the
    /// current sequence number.
    pub fn advance(&self, seqno: u64) -> Result<Checkpoint, CheckpointError> {
        if seqno < self.seqno {
            return Err(CheckpointError::Regression {
                partition: self.partition,
                current: self.seqno,
                attempted: seqno,
            });
        }
        Ok(Self { seqno, ..*self })
    }

    /// Move to the position of `other`, pinning the epoch if unpinned
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Diverged` if the epochs (or partitions)
    /// differ, and `CheckpointError::Regression` if `other` is behind.
    pub fn advance_to(&self, other: &Checkpoint) -> Result<Checkpoint, CheckpointError> {
        if self.compare(other) == CheckpointOrder::Diverged {
            return Err(CheckpointError::Diverged {
                partition: self.partition,
                current_epoch: self.epoch,
                other_epoch: other.epoch,
            });
        }
        let pinned = if self.is_unpinned() {
            Self {
                epoch: other.epoch,
                ..*self
            }
        } else {
            *self
        };
        pinned.advance(other.seqno)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.partition, self.epoch, self.seqno)
    }
}

/// Checkpoints keyed by partition, as exchanged by control operations
pub type CheckpointMap = BTreeMap<PartitionId, Checkpoint>;

/// Build a `CheckpointMap` from a list of checkpoints
pub fn checkpoint_map(checkpoints: impl IntoIterator<Item = Checkpoint>) -> CheckpointMap {
    checkpoints
        .into_iter()
        .map(|cp| (cp.partition, cp))
        .collect()
}
