//! Change events
//!
//! An `Event` is one mutation captured from an upstream partition. Events are
//! transient in this subsystem: they are routed, batched and pushed, and
//! persistence is the receiver's business.

use bytes::Bytes;

use crate::checkpoint::{Checkpoint, PartitionId};
use crate::ids::CollectionId;
use crate::error::ProtocolError;

/// Kind of change carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// New document
    Insert = 1,
    /// Existing document replaced
    Update = 2,
    /// Document removed
    Delete = 3,
    /// Position marker with no document change
    Sync = 4,
}

impl EventKind {
    /// Wire tag for this kind
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire tag
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidEventKind` for unknown tags.
    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            4 => Ok(Self::Sync),
            other => Err(ProtocolError::InvalidEventKind(other)),
        }
    }

    /// Whether this kind is a position marker rather than a mutation
    #[inline]
    pub const fn is_sync(self) -> bool {
        matches!(self, Self::Sync)
    }
}

/// One change event from an upstream partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position of this event in its partition's history
    pub checkpoint: Checkpoint,
    /// Collection the changed document belongs to
    pub collection: CollectionId,
    /// Kind of change
    pub kind: EventKind,
    /// Document key
    pub key: Bytes,
    /// Document body (empty for deletes and syncs)
    pub payload: Bytes,
}

impl Event {
    /// Create an event
    pub fn new(
        checkpoint: Checkpoint,
        collection: impl Into<CollectionId>,
        kind: EventKind,
        key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            checkpoint,
            collection: collection.into(),
            kind,
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Create a sync marker at `checkpoint`
    pub fn sync(checkpoint: Checkpoint, collection: impl Into<CollectionId>) -> Self {
        Self::new(
            checkpoint,
            collection,
            EventKind::Sync,
            Bytes::new(),
            Bytes::new(),
        )
    }

    /// Partition this event came from
    #[inline]
    pub fn partition(&self) -> PartitionId {
        self.checkpoint.partition
    }

    /// Sequence number of this event
    #[inline]
    pub fn seqno(&self) -> u64 {
        self.checkpoint.seqno
    }

    /// Encoded size on the wire, used for batch byte accounting
    #[inline]
    pub fn encoded_len(&self) -> usize {
        // partition + epoch + seqno + kind
        2 + 8 + 8 + 1
            + 2 + self.collection.as_str().len()
            + 4 + self.key.len()
            + 4 + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        for kind in [
            EventKind::Insert,
            EventKind::Update,
            EventKind::Delete,
            EventKind::Sync,
        ] {
            assert_eq!(EventKind::from_u8(kind.as_u8()).unwrap(), kind);
        }
        assert!(matches!(
            EventKind::from_u8(0),
            Err(ProtocolError::InvalidEventKind(0))
        ));
        assert!(EventKind::Sync.is_sync());
        assert!(!EventKind::Delete.is_sync());
    }

    #[test]
    fn test_event_accessors() {
        let cp = Checkpoint::new(PartitionId::new(9), 2, 41);
        let event = Event::new(cp, "users", EventKind::Insert, "k1", "{}");
        assert_eq!(event.partition(), PartitionId::new(9));
        assert_eq!(event.seqno(), 41);
        assert_eq!(event.encoded_len(), 19 + 2 + 5 + 4 + 2 + 4 + 2);
    }

    #[test]
    fn test_sync_has_no_body() {
        let event = Event::sync(Checkpoint::new(PartitionId::new(0), 1, 1), "users");
        assert!(event.kind.is_sync());
        assert!(event.key.is_empty());
        assert!(event.payload.is_empty());
    }
}
