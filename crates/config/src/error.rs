//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A filter references a destination missing from the topology
    #[error("filter references unknown destination '{destination}'")]
    UnknownDestination {
        /// Name of the missing destination
        destination: String,
    },

    /// Validation error - required field missing
    #[error("{component} '{name}' is missing required field '{field}'")]
    MissingField {
        /// Component type (e.g., "destination", "checkpoint")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("{component} '{name}' has invalid {field}: {message}")]
    InvalidValue {
        /// Component type
        component: &'static str,
        /// Name of the component
        name: String,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create an UnknownDestination error
    pub fn unknown_destination(destination: impl Into<String>) -> Self {
        Self::UnknownDestination {
            destination: destination.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_destination_error() {
        let err = ConfigError::unknown_destination("index_eu");
        assert!(err.to_string().contains("index_eu"));
        assert!(err.to_string().contains("unknown destination"));
    }

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("destination", "index_eu", "address");
        assert!(err.to_string().contains("destination"));
        assert!(err.to_string().contains("index_eu"));
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("router", "router", "batch_size", "must be > 0");
        assert!(err.to_string().contains("batch_size"));
        assert!(err.to_string().contains("must be > 0"));
    }
}
