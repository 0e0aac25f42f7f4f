//! Name types for collections and topics
//!
//! Both are backed by `Arc<str>` so cloning one into every event and every
//! pending batch costs a reference count bump, not an allocation.

use std::fmt;
use std::sync::Arc;

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create a new identifier
            #[inline]
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            /// Get the identifier as a string slice
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(Arc::from(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// Identifier of a watched data collection
    ///
    /// ```
    /// use feedline_protocol::CollectionId;
    ///
    /// let id = CollectionId::new("beer-sample");
    /// assert_eq!(id.as_str(), "beer-sample");
    /// ```
    CollectionId
);

name_type!(
    /// Name of a topic: an independently controlled stream instance
    TopicId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_collection_id_equality_and_hash() {
        let mut set = HashSet::new();
        set.insert(CollectionId::new("a"));
        set.insert(CollectionId::from("a"));
        set.insert(CollectionId::from(String::from("b")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_clone_shares_storage() {
        let a = TopicId::new("backfill");
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(b.to_string(), "backfill");
    }
}
