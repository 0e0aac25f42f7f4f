//! Routing error types

use feedline_protocol::CollectionId;
use thiserror::Error;

use crate::filter::MatchPredicate;

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;

/// Errors that can occur while updating a filter table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// Collection is already filtered with a different predicate
    #[error("conflicting filter for collection '{collection}': {existing} vs {requested}")]
    Conflict {
        collection: CollectionId,
        existing: MatchPredicate,
        requested: MatchPredicate,
    },

    /// Filter routes to no destination
    #[error("filter for collection '{collection}' has no destinations")]
    EmptyDestinations { collection: CollectionId },

    /// Destination name interning exhausted the id space
    #[error("too many destinations (max {max})")]
    TooManyDestinations { max: usize },
}

impl RoutingError {
    /// Create a Conflict error
    #[inline]
    pub fn conflict(
        collection: CollectionId,
        existing: MatchPredicate,
        requested: MatchPredicate,
    ) -> Self {
        Self::Conflict {
            collection,
            existing,
            requested,
        }
    }

    /// Create an EmptyDestinations error
    #[inline]
    pub fn empty_destinations(collection: CollectionId) -> Self {
        Self::EmptyDestinations { collection }
    }
}
