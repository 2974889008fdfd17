//! Auto-saving wrapper around a checkpoint and its store.
//!
//! The orchestrator records many small increments per study; persisting
//! each one would make checkpointing the bottleneck. The manager batches:
//! a save happens every N recorded results or every T seconds, whichever
//! trips first, with both gates evaluated synchronously inside
//! `record_result` (there is no independent save timer).

use crate::checkpoint::StudyCheckpoint;
use crate::error::Result;
use crate::store::CheckpointStore;
use bentham_core::cell::CellResult;
use bentham_core::error::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Auto-save policy knobs.
#[derive(Debug, Clone)]
pub struct CheckpointManagerConfig {
    /// Persist after this many recorded results.
    pub save_every_results: usize,

    /// Persist when this much time has passed since the last save.
    pub save_interval: Duration,

    /// Keep the checkpoint file after `finalize()`.
    pub preserve_checkpoint: bool,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        Self {
            save_every_results: 10,
            save_interval: Duration::from_secs(30),
            preserve_checkpoint: false,
        }
    }
}

struct ManagerState {
    checkpoint: StudyCheckpoint,
    results_since_save: usize,
    last_save: Instant,
}

/// Owns one study's checkpoint and persists it on the auto-save policy.
///
/// All writes funnel through this single owner; concurrent readers get
/// clones via [`CheckpointManager::snapshot`].
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    state: Mutex<ManagerState>,
    config: CheckpointManagerConfig,
}

impl CheckpointManager {
    /// Wrap an existing checkpoint.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        checkpoint: StudyCheckpoint,
        config: CheckpointManagerConfig,
    ) -> Self {
        Self {
            store,
            state: Mutex::new(ManagerState {
                checkpoint,
                results_since_save: 0,
                last_save: Instant::now(),
            }),
            config,
        }
    }

    /// Record a cell result, persisting when either auto-save gate trips.
    pub async fn record_result(&self, result: CellResult) -> Result<()> {
        let mut state = self.state.lock().await;
        state.checkpoint.record_result(result);
        state.results_since_save += 1;

        let count_due = state.results_since_save >= self.config.save_every_results;
        let time_due = state.last_save.elapsed() >= self.config.save_interval;
        if count_due || time_due {
            self.persist(&mut state).await?;
        }
        Ok(())
    }

    /// Replace a cell's retry record. Not an auto-save trigger on its own;
    /// the change rides along with the next save.
    pub async fn record_retry(
        &self,
        cell_key: &str,
        attempts: u32,
        last_error: Option<String>,
        last_error_code: Option<ErrorKind>,
        exhausted: bool,
    ) {
        let mut state = self.state.lock().await;
        state
            .checkpoint
            .record_retry(cell_key, attempts, last_error, last_error_code, exhausted);
    }

    /// Persist immediately, resetting both auto-save gates.
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await
    }

    /// Final save, then delete the file unless the policy preserves it.
    pub async fn finalize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await?;

        if !self.config.preserve_checkpoint {
            let study_id = state.checkpoint.study_id.clone();
            drop(state);
            self.store.delete(&study_id).await?;
            info!(study_id = %study_id, "checkpoint finalized and removed");
        }
        Ok(())
    }

    /// Clone of the current checkpoint.
    pub async fn snapshot(&self) -> StudyCheckpoint {
        self.state.lock().await.checkpoint.clone()
    }

    async fn persist(&self, state: &mut ManagerState) -> Result<()> {
        self.store.save(&state.checkpoint).await?;
        debug!(
            study_id = %state.checkpoint.study_id,
            results_batched = state.results_since_save,
            "checkpoint auto-saved"
        );
        state.results_since_save = 0;
        state.last_save = Instant::now();
        Ok(())
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("config", &self.config)
            .finish()
    }
}
