//! Remote configuration client
//!
//! Wraps an injected remote-configuration service (fetch a snapshot, activate
//! it) behind typed, validated accessors. The readable state is a wholesale
//! in-memory snapshot swapped atomically on each successful activation; the
//! accessors never fail — absent or pre-initialization reads return the
//! type-appropriate zero value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of fetch-and-activate attempts
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Sane range a remotely configured call limit must fall into
const LIMIT_RANGE: RangeInclusive<i64> = 1..=1000;

/// Sane range for the request time window (seconds)
const TIME_WINDOW_RANGE: RangeInclusive<i64> = 30..=3600;

/// Keys `has_valid_data` spot-checks after activation
const EXPECTED_LIMIT_KEYS: [&str; 2] = ["rate_limit_hourly", "rate_limit_daily"];

/// A single remotely configured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteValue {
    Bool(bool),
    Number(f64),
    String(String),
}

/// One fetched key/value snapshot
pub type ConfigSnapshot = HashMap<String, RemoteValue>;

/// Errors from the remote configuration client
#[derive(Debug, thiserror::Error)]
pub enum RemoteConfigError {
    #[error("remote config fetch failed (status {status}): {message}")]
    FetchFailed { status: u16, message: String },

    #[error("remote config activation failed: {0}")]
    ActivationFailed(String),

    #[error("remote config fetch failed after {0} attempts")]
    MaxRetriesExceeded(u32),

    #[error("remote config was never successfully initialized")]
    NotInitialized,

    #[error("remote config value failed validation: {0}")]
    ValidationFailed(String),
}

/// The external remote-configuration service contract
///
/// This subsystem needs exactly two operations from the real service; tests
/// substitute fakes without touching process-wide state.
#[async_trait]
pub trait RemoteConfigService: Send + Sync {
    /// Fetch a fresh snapshot from the backend
    async fn fetch(&self) -> Result<ConfigSnapshot, RemoteConfigError>;

    /// Activate a fetched snapshot on the backend side
    async fn activate(&self, snapshot: &ConfigSnapshot) -> Result<(), RemoteConfigError>;
}

/// Client over an injected [`RemoteConfigService`]
pub struct RemoteConfigClient {
    service: Arc<dyn RemoteConfigService>,
    values: RwLock<ConfigSnapshot>,
    initialized: AtomicBool,
    max_attempts: u32,
    backoff_base: Duration,
}

impl RemoteConfigClient {
    pub fn new(service: Arc<dyn RemoteConfigService>) -> Self {
        Self {
            service,
            values: RwLock::new(ConfigSnapshot::new()),
            initialized: AtomicBool::new(false),
            max_attempts: MAX_FETCH_ATTEMPTS,
            backoff_base: Duration::from_millis(BACKOFF_BASE_MS),
        }
    }

    /// Override the retry schedule (tests use a near-zero delay)
    pub fn with_retry_schedule(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_base = backoff_base;
        self
    }

    /// Whether a fetch-and-activate has ever completed successfully
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Fetch a snapshot and swap it into the readable state
    ///
    /// Retries both the fetch and the activation up to the attempt cap,
    /// sleeping between attempts; completes exactly once, with `Ok(())` on
    /// the first success or `MaxRetriesExceeded` after the cap.
    pub async fn fetch_and_activate(&self) -> Result<(), RemoteConfigError> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.try_fetch_and_activate().await {
                Ok(snapshot) => {
                    *self.values.write().unwrap() = snapshot;
                    self.initialized.store(true, Ordering::Release);
                    info!(attempts, "Remote config activated");
                    return Ok(());
                }
                Err(e) if attempts < self.max_attempts => {
                    let backoff = self.backoff_base * 2u32.saturating_pow(attempts - 1);
                    warn!(
                        attempt = attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Remote config attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(attempts, error = %e, "Remote config attempts exhausted");
                    return Err(RemoteConfigError::MaxRetriesExceeded(attempts));
                }
            }
        }
    }

    async fn try_fetch_and_activate(&self) -> Result<ConfigSnapshot, RemoteConfigError> {
        let snapshot = self.service.fetch().await?;
        debug!(keys = snapshot.len(), "Fetched remote config snapshot");
        self.service.activate(&snapshot).await?;
        Ok(snapshot)
    }

    /// String value, `""` when absent, mistyped, or uninitialized
    pub fn get_string(&self, key: &str) -> String {
        match self.values.read().unwrap().get(key) {
            Some(RemoteValue::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Boolean value, `false` when absent, mistyped, or uninitialized
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.values.read().unwrap().get(key),
            Some(RemoteValue::Bool(true))
        )
    }

    /// Integer value, `0` when absent, mistyped, or uninitialized
    pub fn get_i64(&self, key: &str) -> i64 {
        match self.values.read().unwrap().get(key) {
            Some(RemoteValue::Number(n)) => *n as i64,
            _ => 0,
        }
    }

    /// Float value, `0.0` when absent, mistyped, or uninitialized
    pub fn get_f64(&self, key: &str) -> f64 {
        match self.values.read().unwrap().get(key) {
            Some(RemoteValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    /// Non-empty string or a validation error
    pub fn get_validated_string(&self, key: &str) -> Result<String, RemoteConfigError> {
        if !self.is_initialized() {
            return Err(RemoteConfigError::NotInitialized);
        }
        let value = self.get_string(key);
        if value.is_empty() {
            return Err(RemoteConfigError::ValidationFailed(format!(
                "'{}' is absent or empty",
                key
            )));
        }
        Ok(value)
    }

    /// Integer within `allowed`, or a validation error
    pub fn get_validated_i64(
        &self,
        key: &str,
        allowed: RangeInclusive<i64>,
    ) -> Result<i64, RemoteConfigError> {
        if !self.is_initialized() {
            return Err(RemoteConfigError::NotInitialized);
        }
        match self.values.read().unwrap().get(key) {
            Some(RemoteValue::Number(n)) => {
                let value = *n as i64;
                if allowed.contains(&value) {
                    Ok(value)
                } else {
                    Err(RemoteConfigError::ValidationFailed(format!(
                        "'{}' = {} outside [{}, {}]",
                        key,
                        value,
                        allowed.start(),
                        allowed.end()
                    )))
                }
            }
            _ => Err(RemoteConfigError::ValidationFailed(format!(
                "'{}' is absent or not numeric",
                key
            ))),
        }
    }

    /// Cheap sanity gate over a freshly activated snapshot
    ///
    /// Spot-checks the expected limit keys against sane ranges before callers
    /// trust the snapshot for throttling decisions.
    pub fn has_valid_data(&self) -> bool {
        if !self.is_initialized() {
            return false;
        }
        for key in EXPECTED_LIMIT_KEYS {
            if self.get_validated_i64(key, LIMIT_RANGE).is_err() {
                return false;
            }
        }
        // The time window is optional, but if present it must be sane
        let values = self.values.read().unwrap();
        if let Some(RemoteValue::Number(n)) = values.get("request_time_window_secs") {
            if !TIME_WINDOW_RANGE.contains(&(*n as i64)) {
                return false;
            }
        }
        true
    }
}
