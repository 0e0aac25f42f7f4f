//! Checkpoint store configuration

use serde::Deserialize;
use std::path::PathBuf;

/// Where committed partition checkpoints are persisted
///
/// # Example
///
/// ```toml
/// [checkpoint]
/// type = "file"
/// path = "/var/lib/feedline/checkpoints.json"
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointConfig {
    /// Keep checkpoints in memory only (lost on restart)
    #[default]
    Memory,

    /// Persist checkpoints to a JSON file
    File {
        /// Path of the checkpoint file
        path: PathBuf,
    },
}

impl CheckpointConfig {
    /// Store kind name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File { .. } => "file",
        }
    }
}
