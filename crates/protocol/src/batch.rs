//! Event batches
//!
//! Partition workers accumulate routed events per destination in a
//! `BatchBuilder` and hand the finished `EventBatch` to a transport endpoint
//! once the builder is full or the flush interval elapses.

use crate::event::Event;
use crate::ids::TopicId;
use crate::{DEFAULT_BATCH_SIZE, MAX_FRAME_SIZE};

/// Batch frame fields ahead of the events: type, batch id, topic length
/// prefix, event count
const BATCH_HEADER_SIZE: usize = 1 + 8 + 2 + 4;

/// Encoded event bytes one batch frame for `topic` can carry
#[inline]
pub fn max_batch_bytes(topic: &TopicId) -> usize {
    MAX_FRAME_SIZE.saturating_sub(BATCH_HEADER_SIZE + topic.as_str().len())
}

/// A batch of events for one topic, pushed to one receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    /// Topic the events were routed for
    topic: TopicId,

    /// Events in upstream order (per partition)
    events: Vec<Event>,

    /// Sum of the encoded sizes of `events`
    total_bytes: usize,
}

impl EventBatch {
    /// Create a batch from events
    pub fn new(topic: TopicId, events: Vec<Event>) -> Self {
        let total_bytes = events.iter().map(Event::encoded_len).sum();
        Self {
            topic,
            events,
            total_bytes,
        }
    }

    /// Topic of this batch
    #[inline]
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Events in this batch
    #[inline]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Consume the batch, returning its events
    #[inline]
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Number of events
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch has no events
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Encoded size of all events in bytes
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Last event of the batch (highest position for single-partition batches)
    #[inline]
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }
}

/// Accumulates events into an `EventBatch`
#[derive(Debug)]
pub struct BatchBuilder {
    topic: TopicId,
    events: Vec<Event>,
    total_bytes: usize,
    max_items: usize,
    max_bytes: usize,
}

impl BatchBuilder {
    /// Create a builder with the default batch size
    pub fn new(topic: TopicId) -> Self {
        Self::with_max_items(topic, DEFAULT_BATCH_SIZE)
    }

    /// Create a builder that reports full after `max_items` events
    ///
    /// The byte budget defaults to what one frame can carry.
    pub fn with_max_items(topic: TopicId, max_items: usize) -> Self {
        let max_items = max_items.max(1);
        let max_bytes = max_batch_bytes(&topic);
        Self {
            topic,
            events: Vec::with_capacity(max_items.min(DEFAULT_BATCH_SIZE)),
            total_bytes: 0,
            max_items,
            max_bytes,
        }
    }

    /// Lower the byte budget below the frame limit
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.min(max_batch_bytes(&self.topic));
        self
    }

    /// Append an event, returning `true` if the builder is now full
    ///
    /// Callers check [`BatchBuilder::has_room`] first; an event appended
    /// past the byte budget makes the batch unencodable.
    #[inline]
    pub fn add(&mut self, event: Event) -> bool {
        self.total_bytes += event.encoded_len();
        self.events.push(event);
        self.is_full()
    }

    /// Whether `event` fits the remaining byte budget
    #[inline]
    pub fn has_room(&self, event: &Event) -> bool {
        self.total_bytes + event.encoded_len() <= self.max_bytes
    }

    /// Whether the builder reached its item or byte limit
    #[inline]
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.max_items || self.total_bytes >= self.max_bytes
    }

    /// Byte budget of this builder
    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Whether the builder holds no events
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of buffered events
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Buffered bytes
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Topic this builder accumulates for
    #[inline]
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Take the buffered events as a batch, leaving the builder empty
    pub fn take(&mut self) -> EventBatch {
        let events = std::mem::replace(
            &mut self.events,
            Vec::with_capacity(self.max_items.min(DEFAULT_BATCH_SIZE)),
        );
        let total_bytes = std::mem::take(&mut self.total_bytes);
        EventBatch {
            topic: self.topic.clone(),
            events,
            total_bytes,
        }
    }

    /// Drop all buffered events
    pub fn clear(&mut self) {
        self.events.clear();
        self.total_bytes = 0;
    }
}
