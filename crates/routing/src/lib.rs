//! Feedline Routing - Filter tables
//!
//! Maps change events to the destinations a topic's filters select.
//!
//! # Design
//!
//! Each topic owns a [`FilterTable`]. Control operations add and remove
//! filters at runtime; partition workers route every event against the
//! table's current [`FilterSnapshot`].
//!
//! - `DestinationId` is `Copy` - destination names are interned once per table
//! - `route()` returns `&[DestinationId]` - slice into the snapshot, no allocation
//! - Snapshots are swapped atomically; readers never take a lock
//!
//! # Example
//!
//! ```
//! use feedline_protocol::{Checkpoint, Event, EventKind, PartitionId};
//! use feedline_routing::{Filter, FilterTable, MatchPredicate};
//!
//! let table = FilterTable::new();
//! table
//!     .add_filters(&[
//!         Filter::new("orders", ["index-a"]),
//!         Filter::new("users", ["index-b"]).with_predicate(MatchPredicate::key_prefix("eu:")),
//!     ])
//!     .unwrap();
//!
//! let cp = Checkpoint::new(PartitionId::new(0), 1, 1);
//! let snapshot = table.snapshot();
//! let us_user = Event::new(cp, "users", EventKind::Insert, "us:1", "{}");
//! assert!(snapshot.route(&us_user).is_empty());
//! ```

mod destination_id;
mod error;
mod filter;
mod table;

#[cfg(test)]
mod table_test;

pub use destination_id::DestinationId;
pub use error::{Result, RoutingError};
pub use filter::{Filter, MatchPredicate};
pub use table::{FilterSnapshot, FilterTable};
