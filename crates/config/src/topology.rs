//! Destination topology
//!
//! A topology names the downstream receivers a topic may route to. Each
//! destination is typed by its `type` tag; only TCP push destinations exist
//! today and unknown kinds fail to parse.
//!
//! ```toml
//! [topology.index_eu]
//! type = "tcp"
//! address = "10.0.0.5:9100"
//! retry_attempts = 5
//!
//! [topology.index_us]
//! type = "tcp"
//! address = "10.1.0.5:9100"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Named destinations
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Topology {
    destinations: BTreeMap<String, DestinationConfig>,
}

impl Topology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a destination, replacing any previous one with the same name
    #[must_use]
    pub fn with_destination(mut self, name: impl Into<String>, config: DestinationConfig) -> Self {
        self.destinations.insert(name.into(), config);
        self
    }

    /// Add a destination, replacing any previous one with the same name
    pub fn insert(&mut self, name: impl Into<String>, config: DestinationConfig) {
        self.destinations.insert(name.into(), config);
    }

    /// Get a destination by name
    pub fn get(&self, name: &str) -> Option<&DestinationConfig> {
        self.destinations.get(name)
    }

    /// Check if a destination exists
    pub fn contains(&self, name: &str) -> bool {
        self.destinations.contains_key(name)
    }

    /// Iterate over destinations in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DestinationConfig)> {
        self.destinations.iter()
    }

    /// Number of destinations
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    /// Whether the topology is empty
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Validate every destination
    ///
    /// Destinations at the same endpoint key share one connection, so their
    /// settings must be identical.
    ///
    /// # Errors
    ///
    /// Returns the first invalid destination's error.
    pub fn validate(&self) -> Result<()> {
        let mut by_key: BTreeMap<&str, (&str, &DestinationConfig)> = BTreeMap::new();
        for (name, destination) in &self.destinations {
            destination.validate(name)?;
            match by_key.get(destination.endpoint_key()) {
                Some((first, existing)) if *existing != destination => {
                    return Err(ConfigError::invalid_value(
                        "destination",
                        name,
                        "definition",
                        format!(
                            "shares address {} with '{first}' but differs in settings",
                            destination.endpoint_key()
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    by_key.insert(destination.endpoint_key(), (name, destination));
                }
            }
        }
        Ok(())
    }

    /// Check that every name in `names` is part of this topology
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownDestination` for the first missing name.
    pub fn require<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if !self.contains(name) {
                return Err(ConfigError::unknown_destination(name));
            }
        }
        Ok(())
    }

    /// Merge another topology into this one
    ///
    /// Destinations present in both must be identical.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a name is redefined differently;
    /// `self` is unchanged in that case.
    pub fn merge(&mut self, other: &Topology) -> Result<()> {
        for (name, destination) in &other.destinations {
            if let Some(existing) = self.destinations.get(name)
                && existing != destination
            {
                return Err(ConfigError::invalid_value(
                    "destination",
                    name,
                    "definition",
                    "conflicts with the existing definition",
                ));
            }
        }
        for (name, destination) in &other.destinations {
            self.destinations
                .entry(name.clone())
                .or_insert_with(|| destination.clone());
        }
        Ok(())
    }
}

impl FromIterator<(String, DestinationConfig)> for Topology {
    fn from_iter<I: IntoIterator<Item = (String, DestinationConfig)>>(iter: I) -> Self {
        Self {
            destinations: iter.into_iter().collect(),
        }
    }
}

/// Typed destination configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationConfig {
    /// Length-prefixed TCP push protocol
    Tcp(TcpDestinationConfig),
}

impl DestinationConfig {
    /// Create a TCP destination with default settings
    pub fn tcp(address: impl Into<String>) -> Self {
        Self::Tcp(TcpDestinationConfig::new(address))
    }

    /// Destination kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
        }
    }

    /// Key identifying the remote endpoint; destinations with equal keys
    /// share one transport endpoint
    pub fn endpoint_key(&self) -> &str {
        match self {
            Self::Tcp(c) => &c.address,
        }
    }

    /// Validate this destination
    ///
    /// # Errors
    ///
    /// Returns an error naming the destination and the offending field.
    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            Self::Tcp(c) => c.validate(name),
        }
    }
}

/// TCP push destination
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TcpDestinationConfig {
    /// Receiver address (host:port)
    /// Required
    pub address: String,

    /// Bounded queue of pending sends; a full queue blocks senders
    /// Default: 64
    pub queue_size: usize,

    /// Connection timeout
    /// Default: 10s
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Write timeout per frame
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Time to wait for the receiver's ack
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Delivery attempts per batch before the endpoint is marked dead
    /// Default: 3
    pub retry_attempts: usize,

    /// Backoff before the first retry, doubled per attempt
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Upper bound for the retry backoff
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Interval between keep-alive frames on an idle connection
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Interval between statistics log lines
    /// Default: 10s
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// TCP keep-alive probe interval (`None` disables socket keep-alive)
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub tcp_keepalive: Option<Duration>,
}

impl Default for TcpDestinationConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            queue_size: 64,
            connection_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(10),
            tcp_keepalive: Some(Duration::from_secs(30)),
        }
    }
}

impl TcpDestinationConfig {
    /// Create a destination for `address` with default settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Validate this destination
    ///
    /// # Errors
    ///
    /// Returns an error naming the destination and the offending field.
    pub fn validate(&self, name: &str) -> Result<()> {
        const COMPONENT: &str = "destination";

        if self.address.is_empty() {
            return Err(ConfigError::missing_field(COMPONENT, name, "address"));
        }
        let port_ok = self
            .address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !port_ok {
            return Err(ConfigError::invalid_value(
                COMPONENT,
                name,
                "address",
                format!("'{}' is not host:port", self.address),
            ));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::invalid_value(COMPONENT, name, "queue_size", "must be > 0"));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::invalid_value(
                COMPONENT,
                name,
                "retry_attempts",
                "must be > 0",
            ));
        }
        for (field, value) in [
            ("connection_timeout", self.connection_timeout),
            ("write_timeout", self.write_timeout),
            ("ack_timeout", self.ack_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("stats_interval", self.stats_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid_value(COMPONENT, name, field, "must be > 0"));
            }
        }
        if self.max_backoff < self.retry_interval {
            return Err(ConfigError::invalid_value(
                COMPONENT,
                name,
                "max_backoff",
                "must be >= retry_interval",
            ));
        }
        Ok(())
    }
}
