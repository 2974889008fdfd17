//! Checkpoint storage backends.
//!
//! [`CheckpointStore`] is the persistence seam: the file-backed store is
//! the production backend, the in-memory store backs tests. Both must be
//! safe to share across tasks.

use crate::checkpoint::StudyCheckpoint;
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Storage backend for study checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint. Readers must never observe a partial write.
    async fn save(&self, checkpoint: &StudyCheckpoint) -> Result<()>;

    /// Load a study's checkpoint.
    ///
    /// Returns `Ok(None)` when no checkpoint exists. A present-but-corrupt
    /// checkpoint is an error, never `None`.
    async fn load(&self, study_id: &str) -> Result<Option<StudyCheckpoint>>;

    /// Remove a study's checkpoint. Removing a missing checkpoint is not
    /// an error.
    async fn delete(&self, study_id: &str) -> Result<()>;
}

/// File-backed store writing one JSON document per study.
///
/// Writes go to a temporary sibling, are fsynced, then renamed over the
/// target, so a crash mid-save leaves either the previous or the new valid
/// file on disk, never a truncated one.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Path of a study's checkpoint file.
    pub fn checkpoint_path(&self, study_id: &str) -> PathBuf {
        self.dir.join(format!("{study_id}.checkpoint.json"))
    }

    fn temp_path(&self, study_id: &str) -> PathBuf {
        self.dir.join(format!("{study_id}.checkpoint.json.tmp"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &StudyCheckpoint) -> Result<()> {
        let target = self.checkpoint_path(&checkpoint.study_id);
        let temp = self.temp_path(&checkpoint.study_id);

        let bytes = serde_json::to_vec_pretty(checkpoint)?;

        // Temp sibling + fsync + rename keeps the canonical file valid at
        // every instant.
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &target).await?;

        tracing::debug!(
            study_id = %checkpoint.study_id,
            path = %target.display(),
            progress = checkpoint.progress_percent,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, study_id: &str) -> Result<Option<StudyCheckpoint>> {
        let path = self.checkpoint_path(study_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str(&contents) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(source) => Err(CheckpointError::Parse { path, source }),
        }
    }

    async fn delete(&self, study_id: &str) -> Result<()> {
        let path = self.checkpoint_path(study_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for FileCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCheckpointStore")
            .field("dir", &self.dir)
            .finish()
    }
}

/// In-memory store for tests and ephemeral studies.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    storage: RwLock<HashMap<String, StudyCheckpoint>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &StudyCheckpoint) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.insert(checkpoint.study_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, study_id: &str) -> Result<Option<StudyCheckpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(study_id).cloned())
    }

    async fn delete(&self, study_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage.remove(study_id);
        Ok(())
    }
}

/// List the study ids with a checkpoint file under `dir`.
///
/// Temp siblings from interrupted saves are ignored.
pub async fn list_checkpoints(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(study_id) = name.strip_suffix(".checkpoint.json") {
            ids.push(study_id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}
