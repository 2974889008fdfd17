//! Per-surface credential pool.

use super::{
    CooldownReason, Credential, CredentialPoolConfig, CredentialUsage, PoolHealth,
    RotationStrategy,
};
use crate::error::{PoolError, Result};
use bentham_core::events::{EventBus, ExecutionEvent, PoolHealthLevel};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct PoolState {
    credentials: Vec<Credential>,
    usage: Vec<CredentialUsage>,
    cursor: usize,
    strategy: RotationStrategy,
    health: PoolHealth,
}

impl PoolState {
    fn index_of(&self, credential_id: &str) -> Option<usize> {
        self.credentials.iter().position(|c| c.id == credential_id)
    }

    /// Indices of credentials that are active and not cooling down.
    fn available_indices(&self, now: DateTime<Utc>) -> Vec<usize> {
        self.credentials
            .iter()
            .enumerate()
            .filter(|(i, c)| c.active && !self.usage[*i].in_cooldown(now))
            .map(|(i, _)| i)
            .collect()
    }

    fn compute_health(&self, now: DateTime<Utc>, min_active: usize) -> PoolHealth {
        let active = self.credentials.iter().filter(|c| c.active).count();
        let in_cooldown = self
            .credentials
            .iter()
            .enumerate()
            .filter(|(i, c)| c.active && self.usage[*i].in_cooldown(now))
            .count();

        if active == 0 {
            PoolHealth::Critical
        } else if active >= min_active && in_cooldown == 0 {
            PoolHealth::Healthy
        } else {
            PoolHealth::Degraded
        }
    }
}

fn health_level(health: PoolHealth) -> PoolHealthLevel {
    match health {
        PoolHealth::Healthy => PoolHealthLevel::Healthy,
        PoolHealth::Degraded => PoolHealthLevel::Degraded,
        PoolHealth::Critical => PoolHealthLevel::Critical,
    }
}

/// A surface's pool of interchangeable credentials.
///
/// Selection honors the pool-wide rotation strategy; failures cool the
/// credential down and recent-error counts decay as cooldowns expire and
/// the error window moves on. Health is recomputed on every state change
/// and transitions are emitted as `pool_health_changed`.
#[derive(Clone)]
pub struct CredentialPool {
    surface_id: String,
    state: Arc<Mutex<PoolState>>,
    config: CredentialPoolConfig,
    events: Arc<EventBus>,
}

impl CredentialPool {
    /// Create an empty pool for a surface.
    pub fn new(
        surface_id: impl Into<String>,
        config: CredentialPoolConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            surface_id: surface_id.into(),
            state: Arc::new(Mutex::new(PoolState {
                credentials: Vec::new(),
                usage: Vec::new(),
                cursor: 0,
                strategy: RotationStrategy::default(),
                health: PoolHealth::Critical,
            })),
            config,
            events,
        }
    }

    /// Surface this pool serves.
    pub fn surface_id(&self) -> &str {
        &self.surface_id
    }

    /// Add a credential to the pool.
    pub async fn add_credential(&self, credential: Credential) {
        let mut state = self.state.lock().await;
        debug!(
            surface_id = %self.surface_id,
            credential_id = %credential.id,
            "credential added to pool"
        );
        state.credentials.push(credential);
        state.usage.push(CredentialUsage::default());
        self.refresh_health(&mut state, Utc::now());
    }

    /// Change the rotation strategy at runtime.
    pub async fn set_strategy(&self, strategy: RotationStrategy) {
        let mut state = self.state.lock().await;
        state.strategy = strategy;
    }

    /// Current rotation strategy.
    pub async fn strategy(&self) -> RotationStrategy {
        self.state.lock().await.strategy
    }

    /// Hand out the next credential under the rotation strategy.
    ///
    /// Returns `None` when no credential is active and out of cooldown;
    /// callers treat that as the retryable `NO_CREDENTIALS` condition.
    pub async fn get_next(&self) -> Option<Credential> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let available = state.available_indices(now);
        if available.is_empty() {
            return None;
        }

        let pick = match state.strategy {
            RotationStrategy::RoundRobin => {
                let index = available[state.cursor % available.len()];
                state.cursor = state.cursor.wrapping_add(1);
                index
            }
            RotationStrategy::Random => {
                available[rand::thread_rng().gen_range(0..available.len())]
            }
            RotationStrategy::LeastUsed => *available
                .iter()
                .min_by_key(|&&i| (state.usage[i].total_uses, i))
                .expect("available is non-empty"),
            RotationStrategy::LeastErrors => *available
                .iter()
                .min_by_key(|&&i| (state.usage[i].recent_errors, i))
                .expect("available is non-empty"),
            RotationStrategy::Weighted => {
                let weights: Vec<f64> = available
                    .iter()
                    .map(|&i| 1.0 / (1.0 + state.usage[i].recent_errors as f64))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut roll = rand::thread_rng().gen_range(0.0..total);
                let mut chosen = available[available.len() - 1];
                for (&index, weight) in available.iter().zip(weights.iter()) {
                    if roll < *weight {
                        chosen = index;
                        break;
                    }
                    roll -= weight;
                }
                chosen
            }
        };

        let usage = &mut state.usage[pick];
        usage.total_uses += 1;
        usage.last_used_at = Some(now);
        Some(state.credentials[pick].clone())
    }

    /// Record a successful use.
    pub async fn report_success(&self, credential_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state
            .index_of(credential_id)
            .ok_or_else(|| PoolError::UnknownCredential(credential_id.to_string()))?;
        state.usage[index].successful_uses += 1;
        self.refresh_health(&mut state, Utc::now());
        Ok(())
    }

    /// Record a failed use. Any failure starts a cooldown; crossing
    /// `max_errors` records the cooldown as `max_errors_exceeded`.
    pub async fn report_error(&self, credential_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let index = state
            .index_of(credential_id)
            .ok_or_else(|| PoolError::UnknownCredential(credential_id.to_string()))?;

        let cooldown_until =
            now + ChronoDuration::from_std(self.config.error_cooldown).unwrap_or_default();
        let usage = &mut state.usage[index];
        usage.failed_uses += 1;
        usage.recent_errors += 1;
        usage.last_error_at = Some(now);
        usage.cooldown_until = Some(cooldown_until);
        usage.cooldown_reason = if usage.recent_errors >= self.config.max_errors {
            Some(CooldownReason::MaxErrorsExceeded)
        } else {
            Some(CooldownReason::Error)
        };

        warn!(
            surface_id = %self.surface_id,
            credential_id = %credential_id,
            recent_errors = usage.recent_errors,
            reason = ?usage.cooldown_reason,
            "credential entering cooldown"
        );
        self.refresh_health(&mut state, now);
        Ok(())
    }

    /// Mark a credential active or inactive.
    pub async fn set_active(&self, credential_id: &str, active: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state
            .index_of(credential_id)
            .ok_or_else(|| PoolError::UnknownCredential(credential_id.to_string()))?;
        state.credentials[index].active = active;
        self.refresh_health(&mut state, Utc::now());
        Ok(())
    }

    /// One sweep: clear expired cooldowns (decaying `recent_errors` by one)
    /// and zero error counts whose last error left the window.
    ///
    /// Time since a cooldown expired never affects correctness, only how
    /// soon the credential becomes selectable again.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let window = ChronoDuration::from_std(self.config.error_window).unwrap_or_default();
        let mut state = self.state.lock().await;

        for usage in state.usage.iter_mut() {
            if usage.cooldown_until.is_some_and(|until| until <= now) {
                usage.cooldown_until = None;
                usage.cooldown_reason = None;
                usage.recent_errors = usage.recent_errors.saturating_sub(1);
            }
            if usage
                .last_error_at
                .is_some_and(|at| now.signed_duration_since(at) > window)
            {
                usage.recent_errors = 0;
            }
        }
        self.refresh_health(&mut state, now);
    }

    /// Current health grade.
    pub async fn health(&self) -> PoolHealth {
        self.state.lock().await.health
    }

    /// Usage record for a credential.
    pub async fn usage(&self, credential_id: &str) -> Option<CredentialUsage> {
        let state = self.state.lock().await;
        state.index_of(credential_id).map(|i| state.usage[i].clone())
    }

    /// Number of credentials currently selectable.
    pub async fn available_count(&self) -> usize {
        let state = self.state.lock().await;
        state.available_indices(Utc::now()).len()
    }

    fn refresh_health(&self, state: &mut PoolState, now: DateTime<Utc>) {
        let next = state.compute_health(now, self.config.min_active);
        if next != state.health {
            info!(
                surface_id = %self.surface_id,
                previous = ?state.health,
                current = ?next,
                "pool health changed"
            );
            self.events.emit(ExecutionEvent::pool_health_changed(
                self.surface_id.clone(),
                health_level(state.health),
                health_level(next),
            ));
            state.health = next;
        }
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("surface_id", &self.surface_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::CredentialMaterial;
    use super::*;
    use std::time::Duration;

    fn pool_with(config: CredentialPoolConfig) -> CredentialPool {
        CredentialPool::new("surface-1", config, Arc::new(EventBus::new()))
    }

    async fn seeded(count: usize, config: CredentialPoolConfig) -> CredentialPool {
        let pool = pool_with(config);
        for i in 0..count {
            pool.add_credential(Credential::new(
                format!("cred-{i}"),
                "surface-1",
                CredentialMaterial::ApiKey {
                    key: format!("sk-{i}"),
                },
            ))
            .await;
        }
        pool
    }

    #[tokio::test]
    async fn round_robin_cycles_available() {
        let pool = seeded(3, CredentialPoolConfig::default()).await;
        let first = pool.get_next().await.unwrap().id;
        let second = pool.get_next().await.unwrap().id;
        let third = pool.get_next().await.unwrap().id;
        let fourth = pool.get_next().await.unwrap().id;
        assert_eq!(first, "cred-0");
        assert_eq!(second, "cred-1");
        assert_eq!(third, "cred-2");
        assert_eq!(fourth, "cred-0");
    }

    #[tokio::test]
    async fn least_used_prefers_fresh_credentials() {
        let pool = seeded(2, CredentialPoolConfig::default()).await;
        pool.set_strategy(RotationStrategy::LeastUsed).await;

        let a = pool.get_next().await.unwrap().id;
        let b = pool.get_next().await.unwrap().id;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cooled_down_credentials_are_not_selectable() {
        let pool = seeded(2, CredentialPoolConfig::default()).await;
        pool.report_error("cred-0").await.unwrap();

        for _ in 0..4 {
            let picked = pool.get_next().await.unwrap();
            assert_eq!(picked.id, "cred-1");
        }
        assert_eq!(pool.available_count().await, 1);
    }

    #[tokio::test]
    async fn get_next_returns_none_when_exhausted() {
        let pool = seeded(1, CredentialPoolConfig::default()).await;
        pool.report_error("cred-0").await.unwrap();
        assert!(pool.get_next().await.is_none());
    }

    #[tokio::test]
    async fn cooldown_expiry_restores_availability() {
        let config = CredentialPoolConfig {
            error_cooldown: Duration::from_millis(20),
            ..Default::default()
        };
        let pool = seeded(1, config).await;
        pool.report_error("cred-0").await.unwrap();
        assert!(pool.get_next().await.is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.sweep().await;
        assert!(pool.get_next().await.is_some());

        // One-step decay on cooldown expiry.
        assert_eq!(pool.usage("cred-0").await.unwrap().recent_errors, 0);
    }

    #[tokio::test]
    async fn max_errors_records_reason() {
        let config = CredentialPoolConfig {
            max_errors: 2,
            ..Default::default()
        };
        let pool = seeded(1, config).await;
        pool.report_error("cred-0").await.unwrap();
        assert_eq!(
            pool.usage("cred-0").await.unwrap().cooldown_reason,
            Some(CooldownReason::Error)
        );

        pool.report_error("cred-0").await.unwrap();
        assert_eq!(
            pool.usage("cred-0").await.unwrap().cooldown_reason,
            Some(CooldownReason::MaxErrorsExceeded)
        );
    }

    #[tokio::test]
    async fn health_transitions_emit_events() {
        let events = Arc::new(EventBus::new());
        let mut rx = events.subscribe();
        let pool = CredentialPool::new(
            "surface-1",
            CredentialPoolConfig {
                error_cooldown: Duration::from_millis(20),
                ..Default::default()
            },
            events.clone(),
        );

        pool.add_credential(Credential::new(
            "cred-0",
            "surface-1",
            CredentialMaterial::ApiKey { key: "sk".to_string() },
        ))
        .await;

        // critical -> healthy on first credential
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ExecutionEvent::PoolHealthChanged {
                current: PoolHealthLevel::Healthy,
                ..
            }
        ));

        pool.report_error("cred-0").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ExecutionEvent::PoolHealthChanged {
                current: PoolHealthLevel::Degraded,
                ..
            }
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.sweep().await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            ExecutionEvent::PoolHealthChanged {
                current: PoolHealthLevel::Healthy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn inactive_credentials_are_skipped() {
        let pool = seeded(2, CredentialPoolConfig::default()).await;
        pool.set_active("cred-0", false).await.unwrap();
        for _ in 0..3 {
            assert_eq!(pool.get_next().await.unwrap().id, "cred-1");
        }
    }

    #[tokio::test]
    async fn window_expiry_zeroes_recent_errors() {
        let config = CredentialPoolConfig {
            error_cooldown: Duration::from_millis(5),
            error_window: Duration::from_millis(10),
            ..Default::default()
        };
        let pool = seeded(1, config).await;
        pool.report_error("cred-0").await.unwrap();
        pool.report_error("cred-0").await.unwrap();
        assert_eq!(pool.usage("cred-0").await.unwrap().recent_errors, 2);

        tokio::time::sleep(Duration::from_millis(25)).await;
        pool.sweep().await;
        assert_eq!(pool.usage("cred-0").await.unwrap().recent_errors, 0);
    }
}
