//! Reference-counted transport endpoints
//!
//! Destinations with the same endpoint key (remote address) share one
//! [`TransportEndpoint`], across destinations and across topics. Each
//! `(topic, destination)` pair that routes to an endpoint holds one
//! reference; the endpoint is handed back for closing when the last
//! reference is released. A destination may only join an open endpoint when
//! its settings equal the ones the endpoint was opened with.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use feedline_config::{ConfigError, DestinationConfig};
use feedline_endpoint::{EndpointConfig, TransportEndpoint};
use feedline_protocol::TopicId;

/// Holder of an endpoint reference
type Holder = (TopicId, String);

struct Entry {
    endpoint: Arc<TransportEndpoint>,
    config: DestinationConfig,
    holders: BTreeSet<Holder>,
}

/// Endpoints keyed by endpoint key, owned by the router control task
#[derive(Default)]
pub(crate) struct EndpointRegistry {
    entries: HashMap<String, Entry>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check that `destination` can share the endpoint open at its key
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the open endpoint was
    /// configured differently.
    pub(crate) fn check(&self, destination: &str, config: &DestinationConfig) -> Result<(), ConfigError> {
        match self.entries.get(config.endpoint_key()) {
            Some(entry) if entry.config != *config => Err(ConfigError::invalid_value(
                "destination",
                destination,
                "definition",
                format!(
                    "endpoint {} is already open with different settings",
                    config.endpoint_key()
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Take a reference for `(topic, destination)`, spawning the endpoint
    /// on first use. Acquiring twice for the same holder is a no-op.
    pub(crate) fn acquire(
        &mut self,
        topic: &TopicId,
        destination: &str,
        config: &DestinationConfig,
    ) -> Arc<TransportEndpoint> {
        let key = config.endpoint_key();
        let entry = self.entries.entry(key.to_owned()).or_insert_with(|| {
            tracing::info!(destination, address = key, "opening transport endpoint");
            Entry {
                endpoint: TransportEndpoint::spawn(destination, endpoint_config(config)),
                config: config.clone(),
                holders: BTreeSet::new(),
            }
        });
        entry
            .holders
            .insert((topic.clone(), destination.to_owned()));
        Arc::clone(&entry.endpoint)
    }

    /// Drop the reference of `(topic, destination)` on the endpoint at `key`
    ///
    /// Returns the endpoint when this was its last reference; the caller
    /// closes it.
    pub(crate) fn release(
        &mut self,
        topic: &TopicId,
        destination: &str,
        key: &str,
    ) -> Option<Arc<TransportEndpoint>> {
        let entry = self.entries.get_mut(key)?;
        entry
            .holders
            .remove(&(topic.clone(), destination.to_owned()));
        if !entry.holders.is_empty() {
            return None;
        }
        self.entries.remove(key).map(|entry| entry.endpoint)
    }

    /// Remove every endpoint, returning them for closing
    pub(crate) fn drain(&mut self) -> Vec<Arc<TransportEndpoint>> {
        self.entries.drain().map(|(_, entry)| entry.endpoint).collect()
    }

    /// Number of references held on the endpoint at `key`
    pub(crate) fn ref_count(&self, key: &str) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.holders.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

fn endpoint_config(config: &DestinationConfig) -> EndpointConfig {
    match config {
        DestinationConfig::Tcp(tcp) => EndpointConfig::from(tcp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_endpoint::CloseMode;

    fn topic(name: &str) -> TopicId {
        TopicId::new(name)
    }

    #[tokio::test]
    async fn test_shared_endpoint_closed_after_last_release() {
        let mut registry = EndpointRegistry::new();
        let config = DestinationConfig::tcp("127.0.0.1:1");

        let a = registry.acquire(&topic("t1"), "D", &config);
        let b = registry.acquire(&topic("t2"), "D", &config);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ref_count("127.0.0.1:1"), 2);
        assert_eq!(registry.len(), 1);

        assert!(registry.release(&topic("t1"), "D", "127.0.0.1:1").is_none());
        let last = registry
            .release(&topic("t2"), "D", "127.0.0.1:1")
            .expect("last release returns the endpoint");
        assert_eq!(registry.len(), 0);
        last.close(CloseMode::Discard).await;
    }

    #[tokio::test]
    async fn test_destinations_with_same_address_share_endpoint() {
        let mut registry = EndpointRegistry::new();
        let config = DestinationConfig::tcp("127.0.0.1:1");

        let a = registry.acquire(&topic("t1"), "D1", &config);
        let b = registry.acquire(&topic("t1"), "D2", &config);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ref_count("127.0.0.1:1"), 2);

        for endpoint in registry.drain() {
            endpoint.close(CloseMode::Discard).await;
        }
    }

    #[tokio::test]
    async fn test_check_rejects_different_settings_at_open_address() {
        let mut registry = EndpointRegistry::new();
        let config = DestinationConfig::tcp("127.0.0.1:1");
        registry.check("D1", &config).unwrap();
        registry.acquire(&topic("t1"), "D1", &config);

        registry.check("D2", &config).unwrap();
        registry.check("E", &DestinationConfig::tcp("127.0.0.1:2")).unwrap();

        let DestinationConfig::Tcp(mut tcp) = config.clone();
        tcp.retry_attempts = 9;
        let err = registry.check("D2", &DestinationConfig::Tcp(tcp)).unwrap_err();
        assert!(err.to_string().contains("D2"));
        assert!(err.to_string().contains("127.0.0.1:1"));

        for endpoint in registry.drain() {
            endpoint.close(CloseMode::Discard).await;
        }
    }

    #[tokio::test]
    async fn test_repeated_acquire_holds_one_reference() {
        let mut registry = EndpointRegistry::new();
        let config = DestinationConfig::tcp("127.0.0.1:1");

        registry.acquire(&topic("t1"), "D", &config);
        registry.acquire(&topic("t1"), "D", &config);
        assert_eq!(registry.ref_count("127.0.0.1:1"), 1);

        let endpoint = registry.release(&topic("t1"), "D", "127.0.0.1:1").unwrap();
        endpoint.close(CloseMode::Discard).await;
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut registry = EndpointRegistry::new();
        assert!(registry.release(&topic("t1"), "D", "127.0.0.1:1").is_none());
    }
}
