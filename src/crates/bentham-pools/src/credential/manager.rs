//! Lazy per-surface pool management.

use super::{Credential, CredentialPool, CredentialPoolConfig};
use bentham_core::events::EventBus;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Creates and owns one [`CredentialPool`] per surface, lazily.
///
/// Each pool gets a background sweeper that clears expired cooldowns and
/// decays stale error counts. `shutdown()` stops every sweeper and is
/// idempotent.
pub struct CredentialPoolManager {
    pools: DashMap<String, CredentialPool>,
    config: CredentialPoolConfig,
    events: Arc<EventBus>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl CredentialPoolManager {
    /// Create a manager; pools are created on first use per surface.
    pub fn new(config: CredentialPoolConfig, events: Arc<EventBus>) -> Self {
        Self {
            pools: DashMap::new(),
            config,
            events,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Get the pool for a surface, creating it (and its sweeper) if needed.
    pub fn pool(&self, surface_id: &str) -> CredentialPool {
        if let Some(pool) = self.pools.get(surface_id) {
            return pool.clone();
        }

        let pool = CredentialPool::new(surface_id, self.config.clone(), self.events.clone());
        let entry = self
            .pools
            .entry(surface_id.to_string())
            .or_insert_with(|| {
                debug!(surface_id = %surface_id, "creating credential pool");
                self.spawn_sweeper(pool.clone());
                pool
            });
        entry.clone()
    }

    /// Add a credential to its surface's pool.
    pub async fn add_credential(&self, credential: Credential) {
        let pool = self.pool(&credential.surface_id);
        pool.add_credential(credential).await;
    }

    /// Hand out the next credential for a surface, if any is available.
    pub async fn get_next(&self, surface_id: &str) -> Option<Credential> {
        self.pool(surface_id).get_next().await
    }

    /// Surfaces with a pool.
    pub fn surface_ids(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop all sweepers. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown_flag.swap(true, Ordering::SeqCst) {
            info!("credential pool manager shutting down");
            self.shutdown_notify.notify_waiters();
        }
    }

    fn spawn_sweeper(&self, pool: CredentialPool) {
        let shutdown_flag = self.shutdown_flag.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_notify.notified() => break,
                    _ = tick.tick() => {
                        if shutdown_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        pool.sweep().await;
                    }
                }
            }
            debug!(surface_id = %pool.surface_id(), "credential sweeper stopped");
        });
    }
}

impl std::fmt::Debug for CredentialPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPoolManager")
            .field("surfaces", &self.surface_ids())
            .finish()
    }
}
