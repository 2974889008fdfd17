//! Bounded pool of long-lived sessions.

use super::{Session, SessionConfig, SessionHooks, SessionPoolConfig, SessionStatus};
use crate::error::{PoolError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Filters and attribution for a checkout request.
#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    /// Require a specific engine.
    pub engine: Option<super::BrowserEngine>,

    /// Require a specific proxy URL.
    pub proxy_url: Option<String>,

    /// Study taking the session.
    pub study_id: Option<String>,

    /// Tenant taking the session.
    pub tenant_id: Option<String>,

    /// Reserve the session for this request's study: only sessions bound
    /// to the same study (or unbound ones, which become bound) match.
    pub bind_to_study: bool,
}

/// A handed-out session.
///
/// If the holder does not check the session back in by `expires_at`, the
/// health-check tick force-checks it in with an error and recycles it.
#[derive(Debug, Clone)]
pub struct SessionCheckout {
    /// Id of the checked-out session.
    pub session_id: String,

    /// Proxy the session runs through, if any.
    pub proxy_url: Option<String>,

    /// Deadline for checking back in.
    pub expires_at: DateTime<Utc>,
}

/// How a session comes back from a job.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckinDisposition {
    /// Caller asks for the session to be recycled.
    pub recycle: bool,

    /// The job failed in a way that taints the session.
    pub error: bool,
}

impl CheckinDisposition {
    /// Clean check-in.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Request recycling without marking an error.
    pub fn recycle() -> Self {
        Self {
            recycle: true,
            error: false,
        }
    }

    /// Mark the session errored; it will be recycled.
    pub fn error() -> Self {
        Self {
            recycle: true,
            error: true,
        }
    }
}

/// Live counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub warming: usize,
    pub idle: usize,
    pub active: usize,
    pub cooling: usize,
    pub error: usize,
}

impl SessionCounts {
    /// Total sessions present in the pool map.
    pub fn total(&self) -> usize {
        self.warming + self.idle + self.active + self.cooling + self.error
    }
}

struct PoolInner {
    sessions: HashMap<String, Session>,
    checkouts: HashMap<String, DateTime<Utc>>,
}

/// Bounded collection of sessions with warmup, keep-alive, checkout expiry
/// enforcement, and age-based recycling.
///
/// Destroyed sessions are removed from the map immediately, so the map size
/// is always warming + idle + active + cooling + error.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<Mutex<PoolInner>>,
    config: SessionPoolConfig,
    default_session_config: SessionConfig,
    hooks: Arc<dyn SessionHooks>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    tasks: Arc<std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl SessionPool {
    /// Create a pool. Call [`SessionPool::start`] to launch the background
    /// ticks.
    pub fn new(
        config: SessionPoolConfig,
        default_session_config: SessionConfig,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                sessions: HashMap::new(),
                checkouts: HashMap::new(),
            })),
            config,
            default_session_config,
            hooks,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            tasks: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Launch the warmup, keep-alive, and health-check ticks.
    pub fn start(&self) {
        self.spawn_tick(self.config.warmup_interval, |pool| async move {
            pool.warmup_tick().await;
        });
        self.spawn_tick(self.config.keep_alive_interval, |pool| async move {
            pool.keep_alive_tick().await;
        });
        self.spawn_tick(self.config.health_check_interval, |pool| async move {
            pool.health_check_tick().await;
        });
    }

    fn spawn_tick<F, Fut>(&self, interval: std::time::Duration, body: F)
    where
        F: Fn(SessionPool) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let pool = self.clone();
        let shutdown_flag = self.shutdown_flag.clone();
        let shutdown_notify = self.shutdown_notify.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_notify.notified() => break,
                    _ = tick.tick() => {
                        if shutdown_flag.load(Ordering::SeqCst) {
                            break;
                        }
                        body(pool.clone()).await;
                    }
                }
            }
        });
        self.tasks.lock().expect("task list poisoned").push(handle);
    }

    /// Check a session out, creating one if none matches and the pool has
    /// room. Returns `None` when the pool is saturated.
    pub async fn checkout(&self, options: CheckoutOptions) -> Result<Option<SessionCheckout>> {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        let now = Utc::now();

        {
            let mut inner = self.inner.lock().await;
            let matching = inner
                .sessions
                .values()
                .filter(|s| s.status == SessionStatus::Idle)
                .filter(|s| options.engine.map_or(true, |e| s.config.engine == e))
                .filter(|s| {
                    options.proxy_url.is_none() || s.config.proxy_url == options.proxy_url
                })
                .filter(|s| match (&s.bound_study, options.bind_to_study) {
                    (None, _) => true,
                    (Some(bound), true) => Some(bound) == options.study_id.as_ref(),
                    (Some(_), false) => false,
                })
                .map(|s| s.id.clone())
                .next();

            if let Some(session_id) = matching {
                return Ok(Some(self.activate(&mut inner, &session_id, &options, now)));
            }

            if inner.sessions.len() >= self.config.max_sessions {
                debug!(
                    max_sessions = self.config.max_sessions,
                    "session pool saturated"
                );
                return Ok(None);
            }
        }

        // No idle match and room to grow: create through warming.
        let mut session_config = self.default_session_config.clone();
        if let Some(engine) = options.engine {
            session_config.engine = engine;
        }
        if options.proxy_url.is_some() {
            session_config.proxy_url = options.proxy_url.clone();
        }

        let session_id = match self.create_session(session_config).await {
            Some(id) => id,
            None => return Ok(None),
        };

        let mut inner = self.inner.lock().await;
        if inner
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.status == SessionStatus::Idle)
        {
            Ok(Some(self.activate(&mut inner, &session_id, &options, now)))
        } else {
            Ok(None)
        }
    }

    fn activate(
        &self,
        inner: &mut PoolInner,
        session_id: &str,
        options: &CheckoutOptions,
        now: DateTime<Utc>,
    ) -> SessionCheckout {
        let expires_at =
            now + ChronoDuration::from_std(self.config.checkout_timeout).unwrap_or_default();
        let session = inner
            .sessions
            .get_mut(session_id)
            .expect("session present under lock");
        session.status = SessionStatus::Active;
        session.page_count += 1;
        session.last_activity_at = now;
        session.study_id = options.study_id.clone();
        session.tenant_id = options.tenant_id.clone();
        if options.bind_to_study {
            session.bound_study = options.study_id.clone();
        }
        let proxy_url = session.config.proxy_url.clone();
        inner.checkouts.insert(session_id.to_string(), expires_at);

        debug!(session_id = %session_id, "session checked out");
        SessionCheckout {
            session_id: session_id.to_string(),
            proxy_url,
            expires_at,
        }
    }

    /// Return a session to the pool, recycling it when any trigger fires:
    /// caller request, page budget, lifetime, or error.
    pub async fn check_in(&self, session_id: &str, disposition: CheckinDisposition) -> Result<()> {
        let now = Utc::now();
        let max_lifetime = ChronoDuration::from_std(self.config.max_lifetime).unwrap_or_default();

        let to_destroy = {
            let mut inner = self.inner.lock().await;
            inner.checkouts.remove(session_id);

            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;

            let over_pages = session.page_count >= session.config.max_pages;
            let over_lifetime = now.signed_duration_since(session.created_at) > max_lifetime;
            let errored = disposition.error || session.status == SessionStatus::Error;

            if errored {
                session.status = SessionStatus::Error;
            }

            if errored || disposition.recycle || over_pages || over_lifetime {
                if session.status != SessionStatus::Error {
                    session.status = SessionStatus::Cooling;
                }
                session.status = SessionStatus::Destroyed;
                let session = inner.sessions.remove(session_id).expect("present");
                debug!(
                    session_id = %session_id,
                    errored,
                    over_pages,
                    over_lifetime,
                    "session recycled on check-in"
                );
                Some(session)
            } else {
                session.status = SessionStatus::Idle;
                session.study_id = None;
                session.tenant_id = None;
                session.last_activity_at = now;
                None
            }
        };

        if let Some(session) = to_destroy {
            self.hooks.destroy(&session).await;
        }
        Ok(())
    }

    /// Record a successful authentication on a session.
    pub async fn mark_authenticated(
        &self,
        session_id: &str,
        platform: impl Into<String>,
        cookie_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PoolError::UnknownSession(session_id.to_string()))?;
        session.authenticated_at = Some(Utc::now());
        session.platform = Some(platform.into());
        session.cookie_expires_at = cookie_expires_at;
        Ok(())
    }

    /// Clone of a session's current state.
    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.inner.lock().await.sessions.get(session_id).cloned()
    }

    /// Clones of every pooled session.
    pub async fn sessions(&self) -> Vec<Session> {
        self.inner.lock().await.sessions.values().cloned().collect()
    }

    /// Counts per status.
    pub async fn counts(&self) -> SessionCounts {
        let inner = self.inner.lock().await;
        let mut counts = SessionCounts::default();
        for session in inner.sessions.values() {
            match session.status {
                SessionStatus::Warming => counts.warming += 1,
                SessionStatus::Idle => counts.idle += 1,
                SessionStatus::Active => counts.active += 1,
                SessionStatus::Cooling => counts.cooling += 1,
                SessionStatus::Error => counts.error += 1,
                SessionStatus::Destroyed => {}
            }
        }
        counts
    }

    /// One warmup pass: create sessions while below the idle floor and the
    /// size cap.
    pub async fn warmup_tick(&self) {
        loop {
            {
                let inner = self.inner.lock().await;
                let warm_or_warming = inner
                    .sessions
                    .values()
                    .filter(|s| {
                        matches!(s.status, SessionStatus::Idle | SessionStatus::Warming)
                    })
                    .count();
                if warm_or_warming >= self.config.min_idle
                    || inner.sessions.len() >= self.config.max_sessions
                {
                    return;
                }
            }
            if self.create_session(self.default_session_config.clone()).await.is_none() {
                return;
            }
        }
    }

    /// One keep-alive pass over idle sessions. A hook failure moves the
    /// session to error.
    pub async fn keep_alive_tick(&self) {
        let idle: Vec<Session> = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .values()
                .filter(|s| s.status == SessionStatus::Idle)
                .cloned()
                .collect()
        };

        for session in idle {
            match self.hooks.keep_alive(&session).await {
                Ok(()) => {
                    let mut inner = self.inner.lock().await;
                    if let Some(live) = inner.sessions.get_mut(&session.id) {
                        live.last_activity_at = Utc::now();
                    }
                }
                Err(message) => {
                    warn!(session_id = %session.id, error = %message, "keep-alive failed");
                    let mut inner = self.inner.lock().await;
                    if let Some(live) = inner.sessions.get_mut(&session.id) {
                        live.status = SessionStatus::Error;
                    }
                }
            }
        }
    }

    /// One health pass: force check-in of overdue checkouts, destroy
    /// errored sessions, and age out idle sessions past the idle timeout.
    pub async fn health_check_tick(&self) {
        let now = Utc::now();
        let idle_timeout = ChronoDuration::from_std(self.config.idle_timeout).unwrap_or_default();

        let overdue: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .checkouts
                .iter()
                .filter(|(_, expires)| **expires <= now)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for session_id in overdue {
            warn!(session_id = %session_id, "checkout expired, forcing check-in");
            let _ = self.check_in(&session_id, CheckinDisposition::error()).await;
        }

        let to_destroy: Vec<Session> = {
            let mut inner = self.inner.lock().await;
            let doomed: Vec<String> = inner
                .sessions
                .values()
                .filter(|s| match s.status {
                    SessionStatus::Error => !inner.checkouts.contains_key(&s.id),
                    SessionStatus::Idle => {
                        now.signed_duration_since(s.last_activity_at) > idle_timeout
                    }
                    _ => false,
                })
                .map(|s| s.id.clone())
                .collect();

            doomed
                .iter()
                .filter_map(|id| {
                    let mut session = inner.sessions.remove(id)?;
                    if session.status == SessionStatus::Idle {
                        session.status = SessionStatus::Cooling;
                    }
                    session.status = SessionStatus::Destroyed;
                    Some(session)
                })
                .collect()
        };

        for session in to_destroy {
            debug!(session_id = %session.id, "session aged out");
            self.hooks.destroy(&session).await;
        }
    }

    /// Cancel the ticks, then destroy every session. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("session pool shutting down");
        self.shutdown_notify.notify_waiters();

        let handles: Vec<_> = self.tasks.lock().expect("task list poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let sessions: Vec<Session> = {
            let mut inner = self.inner.lock().await;
            inner.checkouts.clear();
            inner
                .sessions
                .drain()
                .map(|(_, mut session)| {
                    session.status = SessionStatus::Destroyed;
                    session
                })
                .collect()
        };
        for session in &sessions {
            self.hooks.destroy(session).await;
        }
        info!(destroyed = sessions.len(), "session pool shut down");
    }

    /// Create a session and warm it up. Returns the id once idle, or
    /// `None` when warmup failed (the session is left in `error` for the
    /// health tick to reap).
    async fn create_session(&self, config: SessionConfig) -> Option<String> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Warming,
            config,
            page_count: 0,
            created_at: now,
            last_activity_at: now,
            authenticated_at: None,
            cookie_expires_at: None,
            platform: None,
            study_id: None,
            tenant_id: None,
            bound_study: None,
        };
        let session_id = session.id.clone();

        {
            let mut inner = self.inner.lock().await;
            if inner.sessions.len() >= self.config.max_sessions {
                return None;
            }
            inner.sessions.insert(session_id.clone(), session.clone());
        }

        match self.hooks.warm_up(&session).await {
            Ok(()) => {
                let mut inner = self.inner.lock().await;
                if let Some(live) = inner.sessions.get_mut(&session_id) {
                    live.status = SessionStatus::Idle;
                    live.last_activity_at = Utc::now();
                }
                debug!(session_id = %session_id, "session warmed up");
                Some(session_id)
            }
            Err(message) => {
                warn!(session_id = %session_id, error = %message, "session warmup failed");
                let mut inner = self.inner.lock().await;
                if let Some(live) = inner.sessions.get_mut(&session_id) {
                    live.status = SessionStatus::Error;
                }
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.config)
            .finish()
    }
}
