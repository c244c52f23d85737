//! Sliding-window call-volume accounting
//!
//! Calls are recorded as epoch-second timestamps keyed by a stable per-device
//! identifier (not user identity). Two trailing windows are enforced: hourly
//! and daily. An entry whose age exactly equals a window boundary is OUTSIDE
//! that window — the cutoff is exclusive on the stale side — and entries aged
//! past 24 hours are purged eagerly on every evaluation.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::SecurityEventLog;
use crate::settings::SettingsStore;

/// Default hourly call limit
pub const DEFAULT_HOURLY_LIMIT: u32 = 100;

/// Default daily call limit
pub const DEFAULT_DAILY_LIMIT: u32 = 1000;

const HOUR_SECS: f64 = 3600.0;
const DAY_SECS: f64 = 86_400.0;

/// Calls remaining in each window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingCalls {
    pub hourly: u32,
    pub daily: u32,
}

/// Per-device sliding-window rate limiter
pub struct RateLimiter {
    settings: Arc<SettingsStore>,
    events: Arc<SecurityEventLog>,
    device_id: String,
    hourly_limit: u32,
    daily_limit: u32,
}

impl RateLimiter {
    /// Open a limiter, creating and persisting the device identifier on
    /// first use
    pub async fn open(
        settings: Arc<SettingsStore>,
        events: Arc<SecurityEventLog>,
        hourly_limit: u32,
        daily_limit: u32,
    ) -> Self {
        let device_id = ensure_device_id(&settings).await;
        Self {
            settings,
            events,
            device_id,
            hourly_limit,
            daily_limit,
        }
    }

    /// Open a limiter with the default limits
    pub async fn with_defaults(
        settings: Arc<SettingsStore>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self::open(settings, events, DEFAULT_HOURLY_LIMIT, DEFAULT_DAILY_LIMIT).await
    }

    /// The stable per-device identifier this limiter accounts under
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether another metered call is currently admissible
    ///
    /// May observe a slightly stale count under heavy concurrency; the
    /// persisted count itself is always exact (see [`RateLimiter::record_call`]).
    pub async fn can_make_call(&self) -> bool {
        let now = now_epoch();
        let (hourly, daily) = self.purged_counts(now).await;
        let allowed = hourly < self.hourly_limit && daily < self.daily_limit;
        if !allowed {
            debug!(hourly, daily, "Call denied by rate limiter");
        }
        allowed
    }

    /// Record an outbound call
    ///
    /// The purge-append-persist runs as one serialized settings update, so N
    /// concurrent recordings persist exactly N entries. Reaching either limit
    /// emits a single rate-limit-violation event for that window.
    pub async fn record_call(&self) {
        let now = now_epoch();
        let device_id = self.device_id.clone();

        let result = self
            .settings
            .update(move |s| {
                let window = s.api_calls.entry(device_id).or_default();
                purge(window, now);
                window.push(now);
                count_windows(window, now)
            })
            .await;

        let (hourly, daily) = match result {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Failed to persist call timestamps");
                return;
            }
        };

        if hourly >= self.hourly_limit {
            self.events
                .log_rate_limit_violation("hourly", self.hourly_limit, hourly)
                .await;
        }
        if daily >= self.daily_limit {
            self.events
                .log_rate_limit_violation("daily", self.daily_limit, daily)
                .await;
        }
    }

    /// Calls remaining before each window limit, saturating at zero
    pub async fn get_remaining_calls(&self) -> RemainingCalls {
        let now = now_epoch();
        let (hourly, daily) = self.purged_counts(now).await;
        RemainingCalls {
            hourly: self.hourly_limit.saturating_sub(hourly),
            daily: self.daily_limit.saturating_sub(daily),
        }
    }

    /// Purge stale entries, persist the purge, and return in-window counts
    async fn purged_counts(&self, now: f64) -> (u32, u32) {
        let device_id = self.device_id.clone();
        let result = self
            .settings
            .update(move |s| {
                let window = s.api_calls.entry(device_id).or_default();
                purge(window, now);
                count_windows(window, now)
            })
            .await;

        match result {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Failed to persist purged call timestamps");
                (0, 0)
            }
        }
    }
}

/// Drop entries that are malformed or aged out of the daily window
///
/// An entry exactly 24 hours old is outside the window and is dropped.
fn purge(window: &mut Vec<f64>, now: f64) {
    window.retain(|ts| ts.is_finite() && now - ts < DAY_SECS);
}

/// In-window counts (hourly, daily); boundary entries are not counted
fn count_windows(window: &[f64], now: f64) -> (u32, u32) {
    let hourly = window.iter().filter(|ts| now - **ts < HOUR_SECS).count() as u32;
    let daily = window.len() as u32;
    (hourly, daily)
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Read the persisted device identifier, creating it on first use
async fn ensure_device_id(settings: &SettingsStore) -> String {
    if let Some(id) = settings.read(|s| s.device_id.clone()).await {
        return id;
    }

    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let id = format!("{}-{}", hostname, Uuid::new_v4());
    let persisted = settings
        .update(|s| {
            // Another task may have created one while we were generating
            s.device_id.get_or_insert_with(|| id.clone()).clone()
        })
        .await;

    match persisted {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Failed to persist device identifier");
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SecurityEventType;
    use crate::settings::InMemorySettingsRepository;

    async fn new_limiter(hourly: u32, daily: u32) -> (Arc<SettingsStore>, Arc<SecurityEventLog>, RateLimiter) {
        let settings = SettingsStore::open(Arc::new(InMemorySettingsRepository::new())).await;
        let events = Arc::new(SecurityEventLog::new(settings.clone()));
        let limiter = RateLimiter::open(settings.clone(), events.clone(), hourly, daily).await;
        (settings, events, limiter)
    }

    async fn seed_calls(settings: &SettingsStore, device_id: &str, timestamps: Vec<f64>) {
        let device_id = device_id.to_string();
        settings
            .update(move |s| {
                s.api_calls.insert(device_id, timestamps);
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_allows_until_hourly_limit() {
        let (_, _, limiter) = new_limiter(5, 100).await;

        for _ in 0..5 {
            assert!(limiter.can_make_call().await);
            limiter.record_call().await;
        }
        assert!(!limiter.can_make_call().await);
    }

    #[tokio::test]
    async fn test_boundary_is_exclusive_on_stale_side() {
        let (settings, _, limiter) = new_limiter(1, 100).await;
        let now = now_epoch();

        // Exactly one hour old: outside the hourly window, call is allowed
        seed_calls(&settings, limiter.device_id(), vec![now - 3600.0]).await;
        assert!(limiter.can_make_call().await);

        // A second inside the window: hourly limit of 1 is consumed
        seed_calls(&settings, limiter.device_id(), vec![now - 3599.0]).await;
        assert!(!limiter.can_make_call().await);
    }

    #[tokio::test]
    async fn test_daily_window_purges_at_24_hours() {
        let (settings, _, limiter) = new_limiter(100, 2).await;
        let now = now_epoch();

        seed_calls(
            &settings,
            limiter.device_id(),
            vec![now - DAY_SECS, now - DAY_SECS - 100.0, now - 10.0],
        )
        .await;

        // The two stale entries are purged eagerly
        assert!(limiter.can_make_call().await);
        let stored = settings
            .read(|s| s.api_calls.values().next().unwrap().clone())
            .await;
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_daily_limit_denies() {
        let (settings, _, limiter) = new_limiter(100, 3).await;
        let now = now_epoch();

        // Three calls spread through the day, none within the last hour
        seed_calls(
            &settings,
            limiter.device_id(),
            vec![now - 5000.0, now - 20_000.0, now - 80_000.0],
        )
        .await;

        assert!(!limiter.can_make_call().await);
    }

    #[tokio::test]
    async fn test_remaining_calls_saturate_at_zero() {
        let (settings, _, limiter) = new_limiter(2, 5).await;
        let now = now_epoch();

        seed_calls(
            &settings,
            limiter.device_id(),
            vec![now - 1.0, now - 2.0, now - 3.0],
        )
        .await;

        let remaining = limiter.get_remaining_calls().await;
        assert_eq!(remaining.hourly, 0);
        assert_eq!(remaining.daily, 2);
    }

    #[tokio::test]
    async fn test_reaching_limit_emits_violation_event() {
        let (_, events, limiter) = new_limiter(2, 100).await;

        limiter.record_call().await;
        assert!(events
            .get_events(Some(SecurityEventType::RateLimitViolation), None, None)
            .await
            .is_empty());

        limiter.record_call().await;
        let violations = events
            .get_events(Some(SecurityEventType::RateLimitViolation), None, None)
            .await;
        assert_eq!(violations.len(), 1);
        assert_eq!(
            violations[0].details.get("limit"),
            Some(&crate::events::DetailValue::Int(2))
        );
        assert_eq!(
            violations[0].details.get("current_count"),
            Some(&crate::events::DetailValue::Int(2))
        );
    }

    #[tokio::test]
    async fn test_malformed_storage_treated_as_empty() {
        let settings = SettingsStore::open(Arc::new(InMemorySettingsRepository::with_document(
            "{\"api_calls\": \"definitely not a map\"}",
        )))
        .await;
        let events = Arc::new(SecurityEventLog::new(settings.clone()));
        let limiter = RateLimiter::open(settings, events, 5, 10).await;

        assert!(limiter.can_make_call().await);
        let remaining = limiter.get_remaining_calls().await;
        assert_eq!(remaining.hourly, 5);
    }

    #[tokio::test]
    async fn test_non_finite_timestamps_are_dropped() {
        let (settings, _, limiter) = new_limiter(5, 10).await;

        seed_calls(
            &settings,
            limiter.device_id(),
            vec![f64::NAN, f64::INFINITY, now_epoch()],
        )
        .await;

        let remaining = limiter.get_remaining_calls().await;
        assert_eq!(remaining.hourly, 4);
        assert_eq!(remaining.daily, 9);
    }

    #[tokio::test]
    async fn test_concurrent_record_calls_persist_exactly_n_entries() {
        let (settings, _, limiter) = new_limiter(100, 1000).await;
        let limiter = Arc::new(limiter);

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.record_call().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let device_id = limiter.device_id().to_string();
        let stored = settings
            .read(move |s| s.api_calls.get(&device_id).cloned().unwrap_or_default())
            .await;
        assert_eq!(stored.len(), 25);
    }

    #[tokio::test]
    async fn test_device_id_is_stable_across_reopens() {
        let settings = SettingsStore::open(Arc::new(InMemorySettingsRepository::new())).await;
        let events = Arc::new(SecurityEventLog::new(settings.clone()));

        let a = RateLimiter::with_defaults(settings.clone(), events.clone()).await;
        let b = RateLimiter::with_defaults(settings.clone(), events).await;
        assert_eq!(a.device_id(), b.device_id());
    }
}
