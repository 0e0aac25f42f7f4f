//! Checkpoint persistence
//!
//! Workers write every committed checkpoint through to a [`CheckpointStore`]
//! so a restarted router (or a restart query) can resume where delivery
//! stopped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use feedline_config::CheckpointConfig;
use feedline_protocol::{Checkpoint, CheckpointMap, PartitionId, checkpoint_map};
use parking_lot::Mutex;

use crate::error::StoreError;

/// Durable record of committed checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Record the committed checkpoint of its partition
    async fn persist(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    /// Last persisted checkpoint of a partition
    async fn load(&self, partition: PartitionId) -> Result<Option<Checkpoint>, StoreError>;
}

/// Open the store selected by the configuration
pub fn open_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>, StoreError> {
    match config {
        CheckpointConfig::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),
        CheckpointConfig::File { path } => Ok(Arc::new(FileCheckpointStore::open(path)?)),
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<CheckpointMap>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted checkpoints
    pub fn checkpoints(&self) -> CheckpointMap {
        self.checkpoints.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn persist(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        self.checkpoints
            .lock()
            .insert(checkpoint.partition, checkpoint);
        Ok(())
    }

    async fn load(&self, partition: PartitionId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.lock().get(&partition).copied())
    }
}

/// JSON file holding the list of committed checkpoints
///
/// Each write replaces the whole file: the list is written to a sibling
/// temporary file which is then renamed over the original.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    /// Held across the write so concurrent persists land in order
    checkpoints: tokio::sync::Mutex<CheckpointMap>,
}

impl FileCheckpointStore {
    /// Open the store at `path`; a missing file starts empty
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let checkpoints = match std::fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<Checkpoint> = serde_json::from_slice(&bytes)?;
                checkpoint_map(list)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckpointMap::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        tracing::debug!(path = %path.display(), partitions = checkpoints.len(), "opened checkpoint file");
        Ok(Self {
            path,
            checkpoints: tokio::sync::Mutex::new(checkpoints),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn persist(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.lock().await;
        if checkpoints.get(&checkpoint.partition) == Some(&checkpoint) {
            return Ok(());
        }

        let mut updated = checkpoints.clone();
        updated.insert(checkpoint.partition, checkpoint);
        let list: Vec<&Checkpoint> = updated.values().collect();
        let json = serde_json::to_vec_pretty(&list)?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| StoreError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        *checkpoints = updated;
        Ok(())
    }

    async fn load(&self, partition: PartitionId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.lock().await.get(&partition).copied())
    }
}
