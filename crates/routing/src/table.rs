//! Filter table with copy-on-write snapshots
//!
//! Partition workers call [`FilterSnapshot::route`] for every event, while
//! control operations add and remove filters concurrently. Readers load the
//! current snapshot lock-free; writers serialise on a mutex, build a fresh
//! snapshot and publish it with one atomic swap.
//!
//! ```text
//! [worker] → [ArcSwap::load()] → [snapshot.route(event)] → &[DestinationId]
//!                  ↑
//! [add_filters / remove_filters] → [lock] → [rebuild] → [ArcSwap::store()]
//! ```
//!
//! A snapshot loaded before an update keeps routing with the old filters
//! until it is dropped, so a reader never observes a half-applied change.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use feedline_protocol::{CollectionId, Event};
use parking_lot::Mutex;

use crate::error::{Result, RoutingError};
use crate::filter::{Filter, MatchPredicate};
use crate::DestinationId;

/// Compiled filter for one collection
#[derive(Debug, Clone)]
struct CompiledFilter {
    predicate: MatchPredicate,
    destinations: Vec<DestinationId>,
}

/// Immutable routing view of a filter table
///
/// # Example
///
/// ```
/// use feedline_protocol::{Checkpoint, Event, EventKind, PartitionId};
/// use feedline_routing::{Filter, FilterTable};
///
/// let table = FilterTable::new();
/// table.add_filters(&[Filter::new("orders", ["index-a"])]).unwrap();
///
/// let snapshot = table.snapshot();
/// let cp = Checkpoint::new(PartitionId::new(0), 1, 1);
/// let event = Event::new(cp, "orders", EventKind::Insert, "k", "{}");
/// let dests = snapshot.route(&event);
/// assert_eq!(snapshot.destination_name(dests[0]), Some("index-a"));
/// ```
#[derive(Debug, Default)]
pub struct FilterSnapshot {
    entries: HashMap<CollectionId, CompiledFilter>,

    /// Union of all filter destinations, sorted; target of sync events
    referenced: Vec<DestinationId>,

    /// Interned names, indexed by `DestinationId`
    names: Vec<String>,
}

impl FilterSnapshot {
    /// Destinations an event should be delivered to
    ///
    /// Sync events bypass collection and predicate matching and go to every
    /// referenced destination. Unfiltered collections route nowhere.
    #[inline]
    pub fn route(&self, event: &Event) -> &[DestinationId] {
        if event.kind.is_sync() {
            return &self.referenced;
        }
        match self.entries.get(&event.collection) {
            Some(entry) if entry.predicate.matches(&event.key) => &entry.destinations,
            _ => &[],
        }
    }

    /// Destinations still used by at least one filter
    #[inline]
    pub fn referenced_destinations(&self) -> &[DestinationId] {
        &self.referenced
    }

    /// Name of an interned destination
    #[inline]
    pub fn destination_name(&self, id: DestinationId) -> Option<&str> {
        self.names.get(id.as_usize()).map(String::as_str)
    }

    /// Whether a collection is filtered
    #[inline]
    pub fn contains(&self, collection: &CollectionId) -> bool {
        self.entries.contains_key(collection)
    }

    /// Number of filtered collections
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no collection is filtered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writer-side state, guarded by the table mutex
#[derive(Debug, Default)]
struct TableState {
    filters: BTreeMap<CollectionId, Filter>,
    names: Vec<String>,
    ids: HashMap<String, DestinationId>,
}

impl TableState {
    /// Filters after merging `filters`, plus destination names not yet interned
    fn merge(&self, filters: &[Filter]) -> Result<(BTreeMap<CollectionId, Filter>, Vec<String>)> {
        let mut merged = self.filters.clone();

        for filter in filters {
            if filter.destinations.is_empty() {
                return Err(RoutingError::empty_destinations(filter.collection.clone()));
            }
            match merged.get_mut(&filter.collection) {
                Some(existing) => {
                    if existing.predicate != filter.predicate {
                        return Err(RoutingError::conflict(
                            filter.collection.clone(),
                            existing.predicate.clone(),
                            filter.predicate.clone(),
                        ));
                    }
                    union_into(&mut existing.destinations, &filter.destinations);
                }
                None => {
                    let mut added = Filter {
                        destinations: Vec::with_capacity(filter.destinations.len()),
                        ..filter.clone()
                    };
                    union_into(&mut added.destinations, &filter.destinations);
                    merged.insert(filter.collection.clone(), added);
                }
            }
        }

        let mut fresh: Vec<String> = Vec::new();
        for name in merged.values().flat_map(|f| f.destinations.iter()) {
            if !self.ids.contains_key(name) && !fresh.contains(name) {
                fresh.push(name.clone());
            }
        }
        if self.names.len() + fresh.len() > usize::from(DestinationId::MAX) {
            return Err(RoutingError::TooManyDestinations {
                max: usize::from(DestinationId::MAX),
            });
        }
        Ok((merged, fresh))
    }

    fn compile(&self) -> FilterSnapshot {
        let mut referenced = BTreeSet::new();
        let entries = self
            .filters
            .values()
            .map(|filter| {
                let destinations: Vec<DestinationId> = filter
                    .destinations
                    .iter()
                    .filter_map(|name| self.ids.get(name).copied())
                    .collect();
                referenced.extend(destinations.iter().copied());
                let compiled = CompiledFilter {
                    predicate: filter.predicate.clone(),
                    destinations,
                };
                (filter.collection.clone(), compiled)
            })
            .collect();

        FilterSnapshot {
            entries,
            referenced: referenced.into_iter().collect(),
            names: self.names.clone(),
        }
    }
}

/// A topic's set of filters
///
/// Destination ids are stable for the lifetime of the table: removing every
/// filter that routes to a destination and adding it back yields the same id.
#[derive(Debug)]
pub struct FilterTable {
    current: ArcSwap<FilterSnapshot>,
    state: Mutex<TableState>,
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(FilterSnapshot::default()),
            state: Mutex::new(TableState::default()),
        }
    }

    /// Current routing snapshot
    #[inline]
    pub fn snapshot(&self) -> Arc<FilterSnapshot> {
        self.current.load_full()
    }

    /// Merge filters into the table
    ///
    /// Re-adding a collection with the same predicate unions its
    /// destinations, so retries are harmless.
    ///
    /// # Errors
    ///
    /// Fails with `RoutingError::Conflict` if a collection is already
    /// filtered (in the table or earlier in `filters`) with a different
    /// predicate. On any error the table is left unchanged.
    pub fn add_filters(&self, filters: &[Filter]) -> Result<()> {
        let mut state = self.state.lock();
        let (merged, fresh) = state.merge(filters)?;

        for name in fresh {
            let id = DestinationId::new(state.names.len() as u16);
            state.names.push(name.clone());
            state.ids.insert(name, id);
        }
        state.filters = merged;
        self.current.store(Arc::new(state.compile()));
        Ok(())
    }

    /// Check that `add_filters` would accept `filters`, without applying them
    ///
    /// # Errors
    ///
    /// Returns the error `add_filters` would return.
    pub fn check_filters(&self, filters: &[Filter]) -> Result<()> {
        self.state.lock().merge(filters).map(|_| ())
    }

    /// Remove the filters of the given collections
    ///
    /// Unknown collections are ignored. Returns the number removed.
    pub fn remove_filters(&self, collections: &[CollectionId]) -> usize {
        let mut state = self.state.lock();
        let removed = collections
            .iter()
            .filter(|c| state.filters.remove(*c).is_some())
            .count();
        if removed > 0 {
            self.current.store(Arc::new(state.compile()));
        }
        removed
    }

    /// Current filters, ordered by collection
    pub fn filters(&self) -> Vec<Filter> {
        self.state.lock().filters.values().cloned().collect()
    }

    /// Interned id of a destination name, if it was ever added
    pub fn destination_id(&self, name: &str) -> Option<DestinationId> {
        self.state.lock().ids.get(name).copied()
    }

    /// Number of filtered collections
    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    /// Whether no collection is filtered
    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}

fn union_into(target: &mut Vec<String>, names: &[String]) {
    for name in names {
        if !target.contains(name) {
            target.push(name.clone());
        }
    }
}
