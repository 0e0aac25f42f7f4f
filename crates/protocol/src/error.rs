//! Protocol error types
//!
//! `ProtocolError` covers malformed frames on the wire (the receiver's
//! serialization failures). `CheckpointError` covers ordering violations
//! when advancing a partition's resume position.

use thiserror::Error;

use crate::checkpoint::PartitionId;

/// Errors that can occur while encoding or decoding wire frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame body is too short to contain required fields
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    /// Frame length prefix exceeds the maximum frame size
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Unknown frame type tag
    #[error("invalid frame type: {0}")]
    InvalidFrameType(u8),

    /// Unknown event kind tag
    #[error("invalid event kind: {0}")]
    InvalidEventKind(u8),

    /// String field is not valid UTF-8
    #[error("invalid utf-8 in field '{0}'")]
    InvalidUtf8(&'static str),

    /// String field does not fit in its length prefix
    #[error("field '{field}' is too long: {len} bytes")]
    FieldTooLong { field: &'static str, len: usize },

    /// Bytes left over after decoding a frame body
    #[error("{0} trailing bytes after frame body")]
    TrailingBytes(usize),

    /// Batch frame whose id was readable but whose events were not
    #[error("malformed batch {batch_id}: {reason}")]
    MalformedBatch {
        batch_id: u64,
        #[source]
        reason: Box<ProtocolError>,
    },
}

impl ProtocolError {
    /// Create a message too short error
    #[inline]
    pub fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    /// Create a frame too large error
    #[inline]
    pub fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Whether the byte stream can no longer be framed after this error
    ///
    /// Body errors consume exactly one frame and leave the stream aligned;
    /// an oversized length prefix does not.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. })
    }
}

/// Errors raised by checkpoint ordering checks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    /// Sequence number moved backwards within one history epoch
    #[error("checkpoint regression on {partition}: seqno {attempted} < current {current}")]
    Regression {
        partition: PartitionId,
        current: u64,
        attempted: u64,
    },

    /// History epoch (or partition) differs, continuation is not possible
    #[error("checkpoint diverged on {partition}: epoch {current_epoch} vs {other_epoch}")]
    Diverged {
        partition: PartitionId,
        current_epoch: u64,
        other_epoch: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::too_short(10, 5);
        assert!(err.to_string().contains("expected at least 10"));

        let err = ProtocolError::frame_too_large(100, 50);
        assert!(err.to_string().contains("exceeds maximum 50"));

        let err = ProtocolError::InvalidFrameType(9);
        assert!(err.to_string().contains("frame type: 9"));

        let err = ProtocolError::InvalidUtf8("topic");
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::Regression {
            partition: PartitionId::new(7),
            current: 10,
            attempted: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("p:7"));
        assert!(msg.contains("seqno 3 < current 10"));

        let err = CheckpointError::Diverged {
            partition: PartitionId::new(1),
            current_epoch: 4,
            other_epoch: 5,
        };
        assert!(err.to_string().contains("epoch 4 vs 5"));
    }
}
