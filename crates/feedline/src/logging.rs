//! Logging initialisation
//!
//! Installs a global `tracing` subscriber from the `[log]` section. `RUST_LOG`
//! takes precedence over the configured level when set.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use feedline_config::{LogConfig, LogFormat, LogOutput};
use thiserror::Error;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Errors from [`init`]
#[derive(Debug, Error)]
pub enum LogError {
    /// Log file could not be opened for appending
    #[error("failed to open log file '{}': {source}", path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A global subscriber is already installed
    #[error("logging already initialised: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by `config`
///
/// # Errors
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let layer = match &config.output {
        LogOutput::Stdout => fmt_layer(config.format, io::stdout, true),
        LogOutput::Stderr => fmt_layer(config.format, io::stderr, true),
        LogOutput::File(path) => fmt_layer(config.format, Mutex::new(open_file(path)?), false),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter(config))
        .try_init()
        .map_err(|e| LogError::AlreadyInitialized(e.to_string()))
}

/// Filter from `RUST_LOG`, else the configured level, else `info`
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Console => Box::new(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true)
                .with_thread_ids(false),
        ),
        LogFormat::Json => Box::new(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        ),
    }
}

fn open_file(path: &Path) -> Result<File, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedline_config::LogLevel;

    #[test]
    fn test_filter_from_config_level() {
        let config = LogConfig {
            level: LogLevel::Debug,
            ..Default::default()
        };
        // RUST_LOG is not set under cargo test unless the caller sets it
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = env_filter(&config).to_string();
            assert!(filter.contains("feedline_router=debug"), "{filter}");
        }
    }

    #[test]
    fn test_open_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedline.log");

        open_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_file_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("feedline.log");

        let err = open_file(&path).unwrap_err();
        assert!(matches!(err, LogError::OpenFile { .. }));
        assert!(err.to_string().contains("missing"));
    }
}
