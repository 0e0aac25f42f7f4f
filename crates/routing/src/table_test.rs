//! Tests for FilterTable
//!
//! Tests cover routing, sync fan-out, merge semantics, conflicts and
//! snapshot isolation.

use std::sync::Arc;
use std::thread;

use feedline_protocol::{Checkpoint, CollectionId, Event, EventKind, PartitionId};

use crate::{DestinationId, Filter, FilterTable, MatchPredicate, RoutingError};

fn event(collection: &str, key: &str) -> Event {
    let cp = Checkpoint::new(PartitionId::new(0), 1, 1);
    Event::new(cp, collection, EventKind::Insert, key.to_owned(), "{}")
}

fn sync() -> Event {
    Event::sync(Checkpoint::new(PartitionId::new(0), 1, 2), "orders")
}

fn names(table: &FilterTable, event: &Event) -> Vec<String> {
    let snapshot = table.snapshot();
    snapshot
        .route(event)
        .iter()
        .filter_map(|id| snapshot.destination_name(*id).map(str::to_owned))
        .collect()
}

// =============================================================================
// Routing
// =============================================================================

#[test]
fn test_new_table_is_empty() {
    let table = FilterTable::new();
    assert!(table.is_empty());
    assert_eq!(table.len(), 0);
    assert!(table.snapshot().route(&event("orders", "k")).is_empty());
    assert!(table.snapshot().route(&sync()).is_empty());
}

#[test]
fn test_route_by_collection() {
    let table = FilterTable::new();
    table
        .add_filters(&[
            Filter::new("orders", ["a"]),
            Filter::new("users", ["b", "c"]),
        ])
        .unwrap();

    assert_eq!(names(&table, &event("orders", "k")), vec!["a"]);
    assert_eq!(names(&table, &event("users", "k")), vec!["b", "c"]);
    assert!(names(&table, &event("unknown", "k")).is_empty());
}

#[test]
fn test_route_with_prefix_predicate() {
    let table = FilterTable::new();
    table
        .add_filters(&[
            Filter::new("users", ["eu-index"]).with_predicate(MatchPredicate::key_prefix("eu:"))
        ])
        .unwrap();

    assert_eq!(names(&table, &event("users", "eu:1")), vec!["eu-index"]);
    assert!(names(&table, &event("users", "us:1")).is_empty());
}

#[test]
fn test_sync_goes_to_all_referenced_destinations() {
    let table = FilterTable::new();
    table
        .add_filters(&[
            Filter::new("orders", ["a"]),
            Filter::new("users", ["b", "a"])
                .with_predicate(MatchPredicate::key_prefix("never-matches")),
        ])
        .unwrap();

    let mut routed = names(&table, &sync());
    routed.sort();
    assert_eq!(routed, vec!["a", "b"]);
}

// =============================================================================
// Merge semantics
// =============================================================================

#[test]
fn test_readd_unions_destinations() {
    let table = FilterTable::new();
    table.add_filters(&[Filter::new("orders", ["a"])]).unwrap();
    table
        .add_filters(&[Filter::new("orders", ["b", "a"])])
        .unwrap();

    assert_eq!(table.len(), 1);
    assert_eq!(names(&table, &event("orders", "k")), vec!["a", "b"]);
    assert_eq!(table.filters()[0].destinations, vec!["a", "b"]);
}

#[test]
fn test_add_is_idempotent() {
    let table = FilterTable::new();
    let filters = [Filter::new("orders", ["a", "a"])];
    table.add_filters(&filters).unwrap();
    table.add_filters(&filters).unwrap();

    assert_eq!(table.filters().len(), 1);
    assert_eq!(table.filters()[0].destinations, vec!["a"]);
}

#[test]
fn test_conflict_leaves_table_unchanged() {
    let table = FilterTable::new();
    table.add_filters(&[Filter::new("orders", ["a"])]).unwrap();

    let err = table
        .add_filters(&[
            Filter::new("users", ["b"]),
            Filter::new("orders", ["a"]).with_predicate(MatchPredicate::key_prefix("x")),
        ])
        .unwrap_err();

    assert!(matches!(err, RoutingError::Conflict { .. }));
    assert_eq!(table.len(), 1);
    assert!(!table.snapshot().contains(&CollectionId::new("users")));
    assert_eq!(table.destination_id("b"), None);
}

#[test]
fn test_conflict_within_one_request() {
    let table = FilterTable::new();
    let err = table
        .add_filters(&[
            Filter::new("orders", ["a"]),
            Filter::new("orders", ["a"]).with_predicate(MatchPredicate::key_prefix("x")),
        ])
        .unwrap_err();
    assert!(matches!(err, RoutingError::Conflict { .. }));
    assert!(table.is_empty());
}

#[test]
fn test_check_filters_does_not_apply() {
    let table = FilterTable::new();
    table.add_filters(&[Filter::new("orders", ["a"])]).unwrap();

    table.check_filters(&[Filter::new("users", ["b"])]).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.destination_id("b"), None);

    let err = table
        .check_filters(&[Filter::new("orders", ["a"]).with_predicate(MatchPredicate::key_prefix("x"))])
        .unwrap_err();
    assert!(matches!(err, RoutingError::Conflict { .. }));
}

#[test]
fn test_empty_destinations_rejected() {
    let table = FilterTable::new();
    let err = table
        .add_filters(&[Filter::new("orders", Vec::<String>::new())])
        .unwrap_err();
    assert!(matches!(err, RoutingError::EmptyDestinations { .. }));
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_filters() {
    let table = FilterTable::new();
    table
        .add_filters(&[Filter::new("orders", ["a"]), Filter::new("users", ["b"])])
        .unwrap();

    let removed = table.remove_filters(&[CollectionId::new("orders"), CollectionId::new("nope")]);
    assert_eq!(removed, 1);
    assert!(names(&table, &event("orders", "k")).is_empty());
    assert_eq!(names(&table, &event("users", "k")), vec!["b"]);

    let referenced = table.snapshot().referenced_destinations().to_vec();
    assert_eq!(referenced, vec![table.destination_id("b").unwrap()]);
}

#[test]
fn test_remove_unknown_is_noop() {
    let table = FilterTable::new();
    table.add_filters(&[Filter::new("orders", ["a"])]).unwrap();
    let before = table.snapshot();

    assert_eq!(table.remove_filters(&[CollectionId::new("users")]), 0);
    assert!(Arc::ptr_eq(&before, &table.snapshot()));
}

#[test]
fn test_destination_ids_are_stable() {
    let table = FilterTable::new();
    table.add_filters(&[Filter::new("orders", ["a"])]).unwrap();
    let id = table.destination_id("a").unwrap();

    table.remove_filters(&[CollectionId::new("orders")]);
    table.add_filters(&[Filter::new("users", ["b", "a"])]).unwrap();

    assert_eq!(table.destination_id("a"), Some(id));
    assert_eq!(table.destination_id("b"), Some(DestinationId::new(1)));
}

// =============================================================================
// Snapshot isolation
// =============================================================================

#[test]
fn test_old_snapshot_unaffected_by_update() {
    let table = FilterTable::new();
    table.add_filters(&[Filter::new("orders", ["a"])]).unwrap();
    let before = table.snapshot();

    table.remove_filters(&[CollectionId::new("orders")]);
    table.add_filters(&[Filter::new("users", ["b"])]).unwrap();

    assert_eq!(before.route(&event("orders", "k")).len(), 1);
    assert!(before.route(&event("users", "k")).is_empty());
    assert!(table.snapshot().route(&event("orders", "k")).is_empty());
}

#[test]
fn test_concurrent_readers_see_whole_snapshots() {
    let table = Arc::new(FilterTable::new());
    table
        .add_filters(&[Filter::new("orders", ["a"]), Filter::new("users", ["a"])])
        .unwrap();

    let reader = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for _ in 0..10_000 {
                let snapshot = table.snapshot();
                let orders = snapshot.route(&event("orders", "k")).len();
                let users = snapshot.route(&event("users", "k")).len();
                // Both collections are always updated together
                assert_eq!(orders, users);
            }
        })
    };

    for i in 0..500 {
        if i % 2 == 0 {
            table.remove_filters(&[CollectionId::new("orders"), CollectionId::new("users")]);
        } else {
            table
                .add_filters(&[Filter::new("orders", ["a"]), Filter::new("users", ["a"])])
                .unwrap();
        }
    }

    reader.join().unwrap();
}
