//! Router-wide routing snapshot
//!
//! Partition workers load one [`RouteSnapshot`] per event. The control task
//! rebuilds it after every topology or filter change and publishes it with a
//! single `ArcSwap` store, so a worker sees either the whole old or the whole
//! new routing state, endpoints and filters together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use feedline_endpoint::TransportEndpoint;
use feedline_protocol::{CollectionId, Event, PartitionId, TopicId};
use feedline_routing::FilterSnapshot;

/// Routing state of every active topic
#[derive(Default)]
pub(crate) struct RouteSnapshot {
    pub(crate) topics: Vec<TopicRoute>,
}

/// Routing state of one active topic
pub(crate) struct TopicRoute {
    pub(crate) topic: TopicId,
    pub(crate) filters: Arc<FilterSnapshot>,
    /// Indexed by `DestinationId`
    pub(crate) endpoints: Vec<Option<Arc<TransportEndpoint>>>,
    /// Destination names holding each endpoint
    pub(crate) holders: Vec<(String, Arc<TransportEndpoint>)>,
    /// Watched collections per partition
    pub(crate) interest: HashMap<PartitionId, HashSet<CollectionId>>,
}

impl RouteSnapshot {
    /// Names of every destination routed through `endpoint`, sorted
    pub(crate) fn destinations_of(&self, endpoint: &Arc<TransportEndpoint>) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .iter()
            .flat_map(|route| &route.holders)
            .filter(|&(_, held)| Arc::ptr_eq(held, endpoint))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl TopicRoute {
    /// Endpoints `event` is delivered to, deduplicated
    ///
    /// Sync events reach every destination of the topic when the topic
    /// watches the partition at all.
    pub(crate) fn targets(&self, event: &Event) -> Vec<&Arc<TransportEndpoint>> {
        let Some(collections) = self.interest.get(&event.partition()) else {
            return Vec::new();
        };
        if !event.kind.is_sync() && !collections.contains(&event.collection) {
            return Vec::new();
        }

        let mut targets: Vec<&Arc<TransportEndpoint>> = Vec::new();
        for id in self.filters.route(event) {
            match self.endpoints.get(id.as_usize()) {
                Some(Some(endpoint)) => {
                    if !targets.iter().any(|t| Arc::ptr_eq(t, endpoint)) {
                        targets.push(endpoint);
                    }
                }
                _ => {
                    tracing::trace!(topic = %self.topic, destination = %id, "no endpoint for destination");
                }
            }
        }
        targets
    }
}
