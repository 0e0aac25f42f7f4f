//! Tests for EventBatch and BatchBuilder

use crate::MAX_FRAME_SIZE;
use crate::batch::{BatchBuilder, EventBatch, max_batch_bytes};
use crate::checkpoint::{Checkpoint, PartitionId};
use crate::event::{Event, EventKind};
use crate::frame::Frame;
use crate::ids::TopicId;

/// Event whose encoded size is exactly `size` bytes
fn event_of_size(seqno: u64, size: usize) -> Event {
    let overhead = event(seqno).encoded_len() - 2;
    Event::new(
        Checkpoint::new(PartitionId::new(0), 1, seqno),
        "orders",
        EventKind::Insert,
        format!("k{seqno}"),
        vec![b'x'; size - overhead],
    )
}

fn event(seqno: u64) -> Event {
    Event::new(
        Checkpoint::new(PartitionId::new(0), 1, seqno),
        "orders",
        EventKind::Insert,
        format!("k{seqno}"),
        "{}",
    )
}

#[test]
fn test_builder_new_is_empty() {
    let builder = BatchBuilder::new(TopicId::new("t"));
    assert!(builder.is_empty());
    assert_eq!(builder.len(), 0);
    assert_eq!(builder.total_bytes(), 0);
    assert!(!builder.is_full());
}

#[test]
fn test_builder_reports_full_at_limit() {
    let mut builder = BatchBuilder::with_max_items(TopicId::new("t"), 3);
    assert!(!builder.add(event(1)));
    assert!(!builder.add(event(2)));
    assert!(builder.add(event(3)));
    assert!(builder.is_full());
}

#[test]
fn test_builder_zero_limit_is_clamped() {
    let mut builder = BatchBuilder::with_max_items(TopicId::new("t"), 0);
    assert!(builder.add(event(1)));
}

#[test]
fn test_take_resets_builder() {
    let mut builder = BatchBuilder::with_max_items(TopicId::new("t"), 10);
    builder.add(event(1));
    builder.add(event(2));
    let bytes = builder.total_bytes();

    let batch = builder.take();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.total_bytes(), bytes);
    assert_eq!(batch.topic().as_str(), "t");
    assert_eq!(batch.last().map(Event::seqno), Some(2));

    assert!(builder.is_empty());
    assert_eq!(builder.total_bytes(), 0);
}

#[test]
fn test_take_preserves_order() {
    let mut builder = BatchBuilder::new(TopicId::new("t"));
    for seqno in 1..=5 {
        builder.add(event(seqno));
    }
    let seqnos: Vec<u64> = builder.take().events().iter().map(Event::seqno).collect();
    assert_eq!(seqnos, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_event_batch_new_counts_bytes() {
    let events = vec![event(1), event(2)];
    let expected: usize = events.iter().map(Event::encoded_len).sum();
    let batch = EventBatch::new(TopicId::new("t"), events);
    assert_eq!(batch.total_bytes(), expected);
    assert!(!batch.is_empty());
    assert_eq!(batch.into_events().len(), 2);
}

#[test]
fn test_clear() {
    let mut builder = BatchBuilder::new(TopicId::new("t"));
    builder.add(event(1));
    builder.clear();
    assert!(builder.is_empty());
    assert_eq!(builder.total_bytes(), 0);
}

// =============================================================================
// Byte budget
// =============================================================================

#[test]
fn test_default_budget_is_frame_limit() {
    let topic = TopicId::new("orders-feed");
    let builder = BatchBuilder::with_max_items(topic.clone(), 10);
    assert_eq!(builder.max_bytes(), max_batch_bytes(&topic));
    assert!(builder.max_bytes() < MAX_FRAME_SIZE);
}

#[test]
fn test_builder_reports_full_at_byte_budget() {
    let mut builder = BatchBuilder::with_max_items(TopicId::new("t"), 100).with_max_bytes(200);
    assert!(builder.has_room(&event_of_size(1, 120)));
    assert!(!builder.add(event_of_size(1, 120)));

    // a second 120-byte event would overflow
    assert!(!builder.has_room(&event_of_size(2, 120)));
    assert!(builder.has_room(&event_of_size(2, 80)));
    assert!(builder.add(event_of_size(2, 80)));
    assert!(builder.is_full());
}

#[test]
fn test_single_event_larger_than_budget_has_no_room() {
    let builder = BatchBuilder::with_max_items(TopicId::new("t"), 100).with_max_bytes(200);
    assert!(builder.has_room(&event_of_size(1, 200)));
    assert!(!builder.has_room(&event_of_size(1, 201)));
}

#[test]
fn test_budget_cannot_exceed_frame_limit() {
    let topic = TopicId::new("t");
    let builder = BatchBuilder::new(topic.clone()).with_max_bytes(usize::MAX);
    assert_eq!(builder.max_bytes(), max_batch_bytes(&topic));
}

#[test]
fn test_batch_at_budget_fits_one_frame() {
    let topic = TopicId::new("t");
    let budget = max_batch_bytes(&topic);
    let half = budget / 2;

    let mut builder = BatchBuilder::with_max_items(topic.clone(), 10);
    builder.add(event_of_size(1, half));
    assert!(builder.has_room(&event_of_size(2, budget - half)));
    assert!(builder.add(event_of_size(2, budget - half)));

    let batch = builder.take();
    assert_eq!(batch.total_bytes(), budget);
    let frame = Frame::Batch { batch_id: 1, batch }.to_bytes().unwrap();
    assert_eq!(frame.len(), MAX_FRAME_SIZE + crate::LENGTH_PREFIX_SIZE);

    // one byte more no longer encodes
    let over = EventBatch::new(topic, vec![event_of_size(1, half), event_of_size(2, budget - half + 1)]);
    assert!(Frame::Batch { batch_id: 2, batch: over }.to_bytes().is_err());
}
