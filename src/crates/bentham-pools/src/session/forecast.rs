//! Authentication-expiry forecasting.
//!
//! Re-authenticating a session is expensive (a full login flow through a
//! browser), so operators need to see expiries coming. The pool bucketizes
//! authenticated sessions into upcoming windows and answers capacity
//! questions like "will three usable sessions for platform X still exist in
//! twenty minutes?".

use super::{Session, SessionPool};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bucketized counts of upcoming cookie expiries.
///
/// Buckets are disjoint: a session expiring in 12 minutes counts toward
/// `next_15_min` only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryForecast {
    /// Expiring within 5 minutes.
    pub next_5_min: usize,

    /// Expiring in (5, 15] minutes.
    pub next_15_min: usize,

    /// Expiring in (15, 30] minutes.
    pub next_30_min: usize,

    /// Expiring in (30, 60] minutes.
    pub next_1_hour: usize,

    /// Authenticated but with no known cookie expiry.
    pub unknown: usize,

    /// All authenticated, live sessions.
    pub total_authenticated: usize,

    /// Per-platform breakdown of the same buckets.
    pub per_platform: HashMap<String, PlatformForecast>,
}

/// One platform's slice of the forecast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformForecast {
    pub next_5_min: usize,
    pub next_15_min: usize,
    pub next_30_min: usize,
    pub next_1_hour: usize,
    pub unknown: usize,
    pub total_authenticated: usize,
}

/// A session approaching its cookie expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringSession {
    pub session_id: String,
    pub platform: Option<String>,
    pub cookie_expires_at: DateTime<Utc>,
    pub minutes_remaining: i64,
}

fn bucketize(forecast: &mut PlatformForecast, minutes: Option<i64>) {
    forecast.total_authenticated += 1;
    match minutes {
        None => forecast.unknown += 1,
        Some(m) if m <= 5 => forecast.next_5_min += 1,
        Some(m) if m <= 15 => forecast.next_15_min += 1,
        Some(m) if m <= 30 => forecast.next_30_min += 1,
        Some(m) if m <= 60 => forecast.next_1_hour += 1,
        Some(_) => {}
    }
}

/// Build a forecast over the given sessions at `now`.
pub fn forecast_at(sessions: &[Session], now: DateTime<Utc>) -> ExpiryForecast {
    let mut result = ExpiryForecast::default();
    let mut totals = PlatformForecast::default();

    for session in sessions {
        if !session.is_live() || session.authenticated_at.is_none() {
            continue;
        }
        let minutes = session
            .cookie_expires_at
            .map(|at| at.signed_duration_since(now).num_minutes());

        bucketize(&mut totals, minutes);
        let platform = session.platform.clone().unwrap_or_default();
        bucketize(result.per_platform.entry(platform).or_default(), minutes);
    }

    result.next_5_min = totals.next_5_min;
    result.next_15_min = totals.next_15_min;
    result.next_30_min = totals.next_30_min;
    result.next_1_hour = totals.next_1_hour;
    result.unknown = totals.unknown;
    result.total_authenticated = totals.total_authenticated;
    result
}

/// Sessions whose cookies expire within `threshold_minutes`, soonest first.
pub fn expiring_soon_at(
    sessions: &[Session],
    threshold_minutes: i64,
    now: DateTime<Utc>,
) -> Vec<ExpiringSession> {
    let mut expiring: Vec<ExpiringSession> = sessions
        .iter()
        .filter(|s| s.is_live())
        .filter_map(|s| {
            let expires_at = s.cookie_expires_at?;
            let minutes = expires_at.signed_duration_since(now).num_minutes();
            (minutes <= threshold_minutes).then(|| ExpiringSession {
                session_id: s.id.clone(),
                platform: s.platform.clone(),
                cookie_expires_at: expires_at,
                minutes_remaining: minutes,
            })
        })
        .collect();
    expiring.sort_by_key(|s| s.minutes_remaining);
    expiring
}

impl SessionPool {
    /// Bucketized expiry forecast over the current pool.
    pub async fn expiry_forecast(&self) -> ExpiryForecast {
        forecast_at(&self.sessions().await, Utc::now())
    }

    /// Sessions expiring within the threshold, ascending by time left.
    pub async fn sessions_expiring_soon(&self, threshold_minutes: i64) -> Vec<ExpiringSession> {
        expiring_soon_at(&self.sessions().await, threshold_minutes, Utc::now())
    }

    /// Whether `required` sessions for `platform` will still be usable in
    /// `within_minutes` (unknown expiries count as usable).
    pub async fn has_capacity(
        &self,
        platform: &str,
        required: usize,
        within_minutes: i64,
    ) -> bool {
        let horizon = Utc::now() + ChronoDuration::minutes(within_minutes);
        let usable = self
            .sessions()
            .await
            .iter()
            .filter(|s| s.is_live())
            .filter(|s| s.platform.as_deref() == Some(platform))
            .filter(|s| s.cookie_expires_at.map_or(true, |at| at > horizon))
            .count();
        usable >= required
    }
}
