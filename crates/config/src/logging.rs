//! Logging configuration
//!
//! The `[log]` section picks a verbosity for the feedline crates, how lines
//! are rendered and where they go. Everything else stays at `warn` unless a
//! directive raises it.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Verbosity applied to the feedline crates
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    /// One JSON object per line, with the current span attached
    Json,
}

/// Where log lines are written
///
/// Any value other than `stdout` or `stderr` is a file path, opened for
/// appending.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    #[serde(untagged)]
    File(PathBuf),
}

const FEEDLINE_TARGETS: &[&str] = &[
    "feedline",
    "feedline_protocol",
    "feedline_routing",
    "feedline_endpoint",
    "feedline_receiver",
    "feedline_router",
];

/// ```toml
/// [log]
/// level = "info"
/// format = "json"
/// output = "/var/log/feedline.log"
/// directives = ["feedline_endpoint=trace", "tokio=info"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Extra `target=level` directives, applied after the level
    pub directives: Vec<String>,
}

impl LogConfig {
    /// Directive string for an `EnvFilter`
    pub fn filter_directive(&self) -> String {
        let mut directive = String::from("warn");
        for target in FEEDLINE_TARGETS {
            directive.push_str(&format!(",{target}={}", self.level));
        }
        for extra in &self.directives {
            directive.push(',');
            directive.push_str(extra.trim());
        }
        directive
    }

    /// Reject directives that would corrupt the combined filter string
    pub fn validate(&self) -> Result<()> {
        for extra in &self.directives {
            let extra = extra.trim();
            if extra.is_empty() || extra.contains(',') {
                return Err(ConfigError::invalid_value(
                    "log",
                    "log",
                    "directives",
                    format!("'{extra}' must be a single non-empty directive"),
                ));
            }
        }
        if let LogOutput::File(path) = &self.output
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::missing_field("log", "log", "output"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_route_info_to_stdout() {
        let config: LogConfig = toml::from_str("").unwrap();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Console);
        assert_eq!(config.output, LogOutput::Stdout);
        assert!(config.directives.is_empty());
    }

    #[test]
    fn test_output_names_and_paths() {
        let config: LogConfig = toml::from_str(r#"output = "stderr""#).unwrap();
        assert_eq!(config.output, LogOutput::Stderr);

        let config: LogConfig = toml::from_str(r#"output = "/var/log/feedline.log""#).unwrap();
        assert_eq!(config.output, LogOutput::File("/var/log/feedline.log".into()));
    }

    #[test]
    fn test_level_applies_to_feedline_crates_only() {
        let config: LogConfig = toml::from_str(r#"level = "trace""#).unwrap();
        let directive = config.filter_directive();

        assert!(directive.starts_with("warn,"), "{directive}");
        for target in FEEDLINE_TARGETS {
            assert!(directive.contains(&format!("{target}=trace")), "{directive}");
        }
    }

    #[test]
    fn test_directives_follow_level() {
        let config: LogConfig = toml::from_str(
            r#"
level = "warn"
directives = ["feedline_endpoint=debug", " tokio=info "]
"#,
        )
        .unwrap();
        config.validate().unwrap();

        let directive = config.filter_directive();
        assert!(directive.ends_with(",feedline_endpoint=debug,tokio=info"), "{directive}");
        assert!(
            directive.find("feedline_endpoint=warn") < directive.find("feedline_endpoint=debug")
        );
    }

    #[test]
    fn test_malformed_directives_rejected() {
        for bad in ["", "  ", "a=debug,b=trace"] {
            let config = LogConfig {
                directives: vec![bad.to_owned()],
                ..LogConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("directives"), "{err}");
        }
    }

    #[test]
    fn test_unknown_level_rejected() {
        assert!(toml::from_str::<LogConfig>(r#"level = "verbose""#).is_err());
    }

    #[test]
    fn test_levels_order_by_verbosity() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }
}
