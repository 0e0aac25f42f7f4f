//! Filters: which events of a collection go where

use std::fmt;

use feedline_protocol::CollectionId;

/// Predicate evaluated against an event key
///
/// Two predicates are compatible only if they are equal; a collection cannot
/// be filtered two different ways within one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchPredicate {
    /// Every key matches
    All,
    /// Keys starting with the given prefix match
    KeyPrefix(String),
}

impl MatchPredicate {
    /// Create a key prefix predicate
    pub fn key_prefix(prefix: impl Into<String>) -> Self {
        Self::KeyPrefix(prefix.into())
    }

    /// Evaluate the predicate on an event key
    #[inline]
    pub fn matches(&self, key: &[u8]) -> bool {
        match self {
            Self::All => true,
            Self::KeyPrefix(prefix) => key.starts_with(prefix.as_bytes()),
        }
    }
}

impl fmt::Display for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::KeyPrefix(prefix) => write!(f, "prefix({prefix})"),
        }
    }
}

/// Routing rule for one collection within a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Collection the filter watches
    pub collection: CollectionId,
    /// Which keys of the collection are routed
    pub predicate: MatchPredicate,
    /// Destination names (keys of the topic's topology)
    pub destinations: Vec<String>,
}

impl Filter {
    /// Create a filter routing every event of `collection`
    pub fn new(
        collection: impl Into<CollectionId>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            collection: collection.into(),
            predicate: MatchPredicate::All,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    /// Replace the predicate
    #[must_use]
    pub fn with_predicate(mut self, predicate: MatchPredicate) -> Self {
        self.predicate = predicate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_matches() {
        assert!(MatchPredicate::All.matches(b""));
        assert!(MatchPredicate::All.matches(b"anything"));

        let prefix = MatchPredicate::key_prefix("eu:");
        assert!(prefix.matches(b"eu:42"));
        assert!(!prefix.matches(b"us:42"));
        assert!(!prefix.matches(b"eu"));
    }

    #[test]
    fn test_filter_builder() {
        let filter = Filter::new("orders", ["idx-a", "idx-b"])
            .with_predicate(MatchPredicate::key_prefix("o:"));
        assert_eq!(filter.collection.as_str(), "orders");
        assert_eq!(filter.destinations, vec!["idx-a", "idx-b"]);
        assert_eq!(filter.predicate.to_string(), "prefix(o:)");
    }
}
