//! Platform configuration.
//!
//! Read once at process start, immutable afterwards. A missing config file
//! yields pure defaults; a present file overrides only the fields it names
//! (serde defaults fill the rest).

use crate::error::{OrchestratorError, Result};
use bentham_checkpoint::CheckpointManagerConfig;
use bentham_pools::{CredentialPoolConfig, SessionPoolConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Process-wide configuration for the execution core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    /// Worker pool sizing.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Dispatch and retry timing.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Checkpoint directory and auto-save policy.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Credential-pool defaults.
    #[serde(default)]
    pub credential_pool: CredentialPoolSettings,

    /// Session-pool defaults.
    #[serde(default)]
    pub session_pool: SessionPoolSettings,
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of workers (≥ 1).
    pub count: usize,

    /// Max concurrent jobs per worker (≥ 1).
    pub max_concurrent_jobs: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 4,
            max_concurrent_jobs: 1,
        }
    }
}

/// Dispatch and retry timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Dispatch loop tick.
    pub scheduler_interval_ms: u64,

    /// Per-job timeout in seconds.
    pub job_timeout_secs: u64,

    /// Base retry delay in milliseconds.
    pub base_retry_delay_ms: u64,

    /// Cap on the retry delay in milliseconds.
    pub max_retry_delay_ms: u64,

    /// Floor applied when no credentials are available, so the
    /// orchestrator does not spin on an exhausted pool.
    pub no_credentials_backoff_secs: u64,

    /// Per-cell duration estimate used for completion forecasts.
    pub per_cell_estimate_secs: u64,

    /// Grace period for in-flight jobs at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            scheduler_interval_ms: 100,
            job_timeout_secs: 120,
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 60_000,
            no_credentials_backoff_secs: 5,
            per_cell_estimate_secs: 10,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }
}

/// Checkpoint directory and auto-save policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory checkpoint files live in.
    pub dir: PathBuf,

    /// Persist after this many recorded results.
    pub save_every_results: usize,

    /// Persist after this many seconds without a save.
    pub save_interval_secs: u64,

    /// Keep checkpoint files after studies finalize.
    pub preserve_checkpoint: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
            save_every_results: 10,
            save_interval_secs: 30,
            preserve_checkpoint: false,
        }
    }
}

impl CheckpointConfig {
    /// Auto-save policy for the checkpoint manager.
    pub fn manager_config(&self) -> CheckpointManagerConfig {
        CheckpointManagerConfig {
            save_every_results: self.save_every_results,
            save_interval: Duration::from_secs(self.save_interval_secs),
            preserve_checkpoint: self.preserve_checkpoint,
        }
    }
}

/// Credential-pool defaults, in file-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialPoolSettings {
    pub min_active: usize,
    pub error_cooldown_ms: u64,
    pub max_errors: u32,
    pub error_window_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for CredentialPoolSettings {
    fn default() -> Self {
        Self {
            min_active: 1,
            error_cooldown_ms: 60_000,
            max_errors: 5,
            error_window_ms: 300_000,
            sweep_interval_ms: 10_000,
        }
    }
}

impl CredentialPoolSettings {
    pub fn pool_config(&self) -> CredentialPoolConfig {
        CredentialPoolConfig {
            min_active: self.min_active,
            error_cooldown: Duration::from_millis(self.error_cooldown_ms),
            max_errors: self.max_errors,
            error_window: Duration::from_millis(self.error_window_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

/// Session-pool defaults, in file-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPoolSettings {
    pub min_idle: usize,
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub keep_alive_interval_secs: u64,
    pub checkout_timeout_secs: u64,
    pub warmup_interval_secs: u64,
    pub health_check_interval_secs: u64,
}

impl Default for SessionPoolSettings {
    fn default() -> Self {
        Self {
            min_idle: 2,
            max_sessions: 10,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1_800,
            keep_alive_interval_secs: 30,
            checkout_timeout_secs: 120,
            warmup_interval_secs: 10,
            health_check_interval_secs: 15,
        }
    }
}

impl SessionPoolSettings {
    pub fn pool_config(&self) -> SessionPoolConfig {
        SessionPoolConfig {
            min_idle: self.min_idle,
            max_sessions: self.max_sessions,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_lifetime: Duration::from_secs(self.max_lifetime_secs),
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            checkout_timeout: Duration::from_secs(self.checkout_timeout_secs),
            warmup_interval: Duration::from_secs(self.warmup_interval_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
        }
    }
}

impl PlatformConfig {
    /// Reject configurations the dispatch loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers.count == 0 {
            return Err(OrchestratorError::Config(
                "workers.count must be at least 1".to_string(),
            ));
        }
        if self.workers.max_concurrent_jobs == 0 {
            return Err(OrchestratorError::Config(
                "workers.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration, starting from defaults and merging `path` when it
/// exists.
pub async fn load_config(path: Option<&Path>) -> Result<PlatformConfig> {
    let config = match path {
        Some(path) if path.exists() => {
            let contents = tokio::fs::read_to_string(path).await?;
            let config: PlatformConfig = toml::from_str(&contents)
                .map_err(|e| OrchestratorError::Config(format!("{}: {e}", path.display())))?;
            debug!(path = %path.display(), "loaded platform config");
            config
        }
        Some(path) => {
            debug!(path = %path.display(), "config file not found, using defaults");
            PlatformConfig::default()
        }
        None => PlatformConfig::default(),
    };

    config.validate()?;
    info!(
        workers = config.workers.count,
        checkpoint_dir = %config.checkpoint.dir.display(),
        "platform configuration loaded"
    );
    Ok(config)
}
