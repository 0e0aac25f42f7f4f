//! Feedline Protocol - Core types for change feed routing
//!
//! This crate provides the types shared by every other feedline crate:
//! - `PartitionId`, `Checkpoint` - Partition resume positions with epoch-aware ordering
//! - `Event`, `EventKind` - Change events captured from upstream partitions
//! - `EventBatch`, `BatchBuilder` - Per-destination batches
//! - `Frame`, `FrameDecoder` - The length-prefixed push protocol
//!
//! # Design Principles
//!
//! - **Zero-copy**: Event keys and payloads are `bytes::Bytes`, decoded frames
//!   share the read buffer
//! - **Cheap names**: Collections and topics are `Arc<str>` backed
//! - **Explicit ordering**: Checkpoint comparison reports divergence instead of
//!   guessing across history branches

mod batch;
mod checkpoint;
mod error;
mod event;
mod frame;
mod ids;

pub use batch::{BatchBuilder, EventBatch, max_batch_bytes};
pub use checkpoint::{
    Checkpoint, CheckpointMap, CheckpointOrder, PartitionId, UNPINNED_EPOCH, checkpoint_map,
};
pub use error::{CheckpointError, ProtocolError};
pub use event::{Event, EventKind};
pub use frame::{Frame, FrameDecoder, SenderStats};
pub use ids::{CollectionId, TopicId};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Default batch size (number of events before flush)
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the big-endian length prefix in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

// Test modules - only compiled during testing
#[cfg(test)]
mod batch_test;
