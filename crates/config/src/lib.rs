//! Feedline Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use feedline_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[router]\nbatch_size = 100").unwrap();
//! assert_eq!(config.router.batch_size, 100);
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [router]
//! partition_count = 1024
//! flush_interval = "50ms"
//!
//! [checkpoint]
//! type = "file"
//! path = "/var/lib/feedline/checkpoints.json"
//!
//! [receiver]
//! port = 9100
//!
//! [topology.index_eu]
//! type = "tcp"
//! address = "10.0.0.5:9100"
//! ```

mod checkpoint;
mod error;
mod logging;
mod receiver;
mod router;
mod topology;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use checkpoint::CheckpointConfig;
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use receiver::ReceiverConfig;
pub use router::RouterConfig;
pub use topology::{DestinationConfig, TcpDestinationConfig, Topology};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,

    /// Stream router settings
    pub router: RouterConfig,

    /// Checkpoint store selection
    pub checkpoint: CheckpointConfig,

    /// Receiver application listener
    pub receiver: ReceiverConfig,

    /// Named downstream destinations
    pub topology: Topology,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, contains invalid TOML or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    ///
    /// Prefer using the `FromStr` trait implementation.
    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        self.log.validate()?;
        validate_router(&self.router)?;

        if let CheckpointConfig::File { path } = &self.checkpoint
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::missing_field("checkpoint", "file", "path"));
        }

        if self.receiver.buffer_size == 0 {
            return Err(ConfigError::invalid_value(
                "receiver",
                self.receiver.bind_address(),
                "buffer_size",
                "must be > 0",
            ));
        }
        if self.receiver.idle_timeout.is_zero() || self.receiver.stats_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "receiver",
                self.receiver.bind_address(),
                "interval",
                "idle_timeout and stats_interval must be > 0",
            ));
        }

        self.topology.validate()
    }
}

fn validate_router(router: &RouterConfig) -> Result<()> {
    const COMPONENT: &str = "router";

    for (field, value) in [
        ("partition_count", usize::from(router.partition_count)),
        ("max_partitions", router.max_partitions),
        ("batch_size", router.batch_size),
        ("worker_channel_size", router.worker_channel_size),
        ("control_channel_size", router.control_channel_size),
        ("notice_capacity", router.notice_capacity),
    ] {
        if value == 0 {
            return Err(ConfigError::invalid_value(COMPONENT, COMPONENT, field, "must be > 0"));
        }
    }
    if router.flush_interval.is_zero() {
        return Err(ConfigError::invalid_value(
            COMPONENT,
            COMPONENT,
            "flush_interval",
            "must be > 0",
        ));
    }
    if router.request_timeout.is_zero() {
        return Err(ConfigError::invalid_value(
            COMPONENT,
            COMPONENT,
            "request_timeout",
            "must be > 0",
        ));
    }
    Ok(())
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
