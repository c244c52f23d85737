//! Append-only, bounded security event log
//!
//! Stored events are the source of truth; the console and remote-telemetry
//! sinks are best-effort mirrors gated by per-sink severity thresholds. A
//! sink failure never loses the stored event and never reaches the caller.

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::event::{DetailValue, SecurityEvent, SecurityEventType, SecurityLevel};
use crate::settings::SettingsStore;

/// Maximum number of events retained in the ring
pub const MAX_STORED_EVENTS: usize = 1000;

/// How many critical events `get_statistics` surfaces
const RECENT_CRITICAL_CAP: usize = 10;

/// Best-effort remote delivery of security events
#[async_trait::async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, event: &SecurityEvent) -> anyhow::Result<()>;
}

/// Aggregated view over the stored events
#[derive(Debug, Clone, PartialEq)]
pub struct EventStatistics {
    pub total: usize,
    pub last_24h: usize,
    pub last_7d: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    /// Critical events from the last 24 hours, most recent first
    pub recent_critical: Vec<SecurityEvent>,
}

/// The audit trail for the security subsystem
pub struct SecurityEventLog {
    settings: Arc<SettingsStore>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl SecurityEventLog {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            telemetry: None,
        }
    }

    /// Attach a remote telemetry sink
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Record an event: append to the bounded ring, persist, mirror to sinks
    pub async fn log_event(&self, event: SecurityEvent) -> SecurityEvent {
        let store_locally = self.settings.read(|s| s.store_events_locally).await;

        let append = |s: &mut crate::settings::SecuritySettings| {
            s.events.push(event.clone());
            if s.events.len() > MAX_STORED_EVENTS {
                let excess = s.events.len() - MAX_STORED_EVENTS;
                s.events.drain(..excess);
            }
        };

        if store_locally {
            if let Err(e) = self.settings.update(append).await {
                // The in-memory ring already has the event; only persistence failed
                warn!(error = %e, "Failed to persist security event ring");
            }
        } else {
            self.settings.update_memory(append).await;
        }

        self.mirror_to_console(&event).await;
        self.mirror_to_telemetry(&event).await;

        event
    }

    async fn mirror_to_console(&self, event: &SecurityEvent) {
        let threshold = self.settings.read(|s| s.console_log_level).await;
        if event.level < threshold {
            return;
        }
        let kind = event.event_type.as_str();
        let service = event.service.as_deref().unwrap_or("-");
        match event.level {
            SecurityLevel::Debug => debug!(kind, service, "security event"),
            SecurityLevel::Info => info!(kind, service, "security event"),
            SecurityLevel::Warning => warn!(kind, service, "security event"),
            SecurityLevel::Error => error!(kind, service, "security event"),
            SecurityLevel::Critical => error!(kind, service, critical = true, "security event"),
        }
    }

    async fn mirror_to_telemetry(&self, event: &SecurityEvent) {
        let Some(sink) = &self.telemetry else {
            return;
        };
        let threshold = self.settings.read(|s| s.telemetry_log_level).await;
        if event.level < threshold {
            return;
        }
        if let Err(e) = sink.send(event).await {
            warn!(error = %e, kind = event.event_type.as_str(), "Telemetry delivery failed");
        }
    }

    // Convenience constructors with the fixed default severities.

    pub async fn log_rate_limit_violation(
        &self,
        window: &str,
        limit: u32,
        current_count: u32,
    ) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::RateLimitViolation,
            SecurityEventType::RateLimitViolation.default_level(),
        )
        .with_detail("window", window)
        .with_detail("limit", limit)
        .with_detail("current_count", current_count);
        self.log_event(event).await
    }

    pub async fn log_timestamp_validation_failure(
        &self,
        service: &str,
        endpoint: &str,
        delta_secs: Option<i64>,
    ) -> SecurityEvent {
        let mut event = SecurityEvent::new(
            SecurityEventType::TimestampValidationFailure,
            SecurityEventType::TimestampValidationFailure.default_level(),
        )
        .with_service(service)
        .with_endpoint(endpoint);
        event = match delta_secs {
            Some(delta) => event.with_detail("delta_secs", delta),
            None => event.with_detail("reason", "unparsable"),
        };
        self.log_event(event).await
    }

    pub async fn log_api_key_missing(&self, key_type: &str, service: &str) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::ApiKeyMissing,
            SecurityEventType::ApiKeyMissing.default_level(),
        )
        .with_service(service)
        .with_detail("key_type", key_type);
        self.log_event(event).await
    }

    pub async fn log_api_key_invalid(
        &self,
        key_type: &str,
        service: &str,
        reason: &str,
    ) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::ApiKeyInvalid,
            SecurityEventType::ApiKeyInvalid.default_level(),
        )
        .with_service(service)
        .with_detail("key_type", key_type)
        .with_detail("reason", reason);
        self.log_event(event).await
    }

    pub async fn log_authentication_failure(&self, service: &str, message: &str) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationFailure,
            SecurityEventType::AuthenticationFailure.default_level(),
        )
        .with_service(service)
        .with_error_message(message);
        self.log_event(event).await
    }

    pub async fn log_authorization_failure(&self, service: &str, endpoint: &str) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::AuthorizationFailure,
            SecurityEventType::AuthorizationFailure.default_level(),
        )
        .with_service(service)
        .with_endpoint(endpoint);
        self.log_event(event).await
    }

    /// Severity is chosen by the caller for suspicious activity
    pub async fn log_suspicious_activity(
        &self,
        level: SecurityLevel,
        description: &str,
        details: BTreeMap<String, DetailValue>,
    ) -> SecurityEvent {
        let mut event = SecurityEvent::new(SecurityEventType::SuspiciousActivity, level)
            .with_error_message(description);
        event.details = details;
        self.log_event(event).await
    }

    pub async fn log_data_tampering(&self, service: &str, message: &str) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::DataTampering,
            SecurityEventType::DataTampering.default_level(),
        )
        .with_service(service)
        .with_error_message(message);
        self.log_event(event).await
    }

    pub async fn log_encryption_failure(&self, context: &str, message: &str) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::EncryptionFailure,
            SecurityEventType::EncryptionFailure.default_level(),
        )
        .with_detail("context", context)
        .with_error_message(message);
        self.log_event(event).await
    }

    pub async fn log_network_security_violation(
        &self,
        service: &str,
        endpoint: &str,
        message: &str,
    ) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::NetworkSecurityViolation,
            SecurityEventType::NetworkSecurityViolation.default_level(),
        )
        .with_service(service)
        .with_endpoint(endpoint)
        .with_error_message(message);
        self.log_event(event).await
    }

    pub async fn log_configuration_error(&self, message: &str) -> SecurityEvent {
        let event = SecurityEvent::new(
            SecurityEventType::ConfigurationError,
            SecurityEventType::ConfigurationError.default_level(),
        )
        .with_error_message(message);
        self.log_event(event).await
    }

    /// Stored events, most recent first, optionally filtered and capped
    pub async fn get_events(
        &self,
        event_type: Option<SecurityEventType>,
        level: Option<SecurityLevel>,
        limit: Option<usize>,
    ) -> Vec<SecurityEvent> {
        self.settings
            .read(|s| {
                s.events
                    .iter()
                    .rev()
                    .filter(|e| event_type.map_or(true, |t| e.event_type == t))
                    .filter(|e| level.map_or(true, |l| e.level == l))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Aggregate statistics over the stored events
    pub async fn get_statistics(&self) -> EventStatistics {
        let now = Utc::now();
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        self.settings
            .read(|s| {
                let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
                let mut by_level: BTreeMap<String, usize> = BTreeMap::new();
                let mut last_24h = 0;
                let mut last_7d = 0;
                let mut recent_critical = Vec::new();

                for event in s.events.iter().rev() {
                    *by_type.entry(event.event_type.as_str().to_string()).or_default() += 1;
                    *by_level.entry(event.level.as_str().to_string()).or_default() += 1;
                    if event.timestamp >= day_ago {
                        last_24h += 1;
                        if event.level == SecurityLevel::Critical
                            && recent_critical.len() < RECENT_CRITICAL_CAP
                        {
                            recent_critical.push(event.clone());
                        }
                    }
                    if event.timestamp >= week_ago {
                        last_7d += 1;
                    }
                }

                EventStatistics {
                    total: s.events.len(),
                    last_24h,
                    last_7d,
                    by_type,
                    by_level,
                    recent_critical,
                }
            })
            .await
    }

    /// Drop every stored event
    pub async fn clear_stored_events(&self) {
        if let Err(e) = self.settings.update(|s| s.events.clear()).await {
            warn!(error = %e, "Failed to persist cleared event ring");
        }
    }

    /// Change the console sink's minimum severity (persisted)
    pub async fn set_console_threshold(&self, level: SecurityLevel) {
        if let Err(e) = self.settings.update(|s| s.console_log_level = level).await {
            warn!(error = %e, "Failed to persist console log level");
        }
    }

    /// Change the telemetry sink's minimum severity (persisted)
    pub async fn set_telemetry_threshold(&self, level: SecurityLevel) {
        if let Err(e) = self.settings.update(|s| s.telemetry_log_level = level).await {
            warn!(error = %e, "Failed to persist telemetry log level");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::InMemorySettingsRepository;
    use std::sync::Mutex;

    struct RecordingSink {
        sent: Mutex<Vec<SecurityEvent>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(fail: bool) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl TelemetrySink for RecordingSink {
        async fn send(&self, event: &SecurityEvent) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("telemetry endpoint unreachable");
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    async fn new_log() -> (Arc<SettingsStore>, SecurityEventLog) {
        let settings = SettingsStore::open(Arc::new(InMemorySettingsRepository::new())).await;
        let log = SecurityEventLog::new(settings.clone());
        (settings, log)
    }

    #[tokio::test]
    async fn test_ring_is_bounded_to_most_recent_1000() {
        let (_, log) = new_log().await;

        for i in 0..1010u32 {
            let event = SecurityEvent::new(
                SecurityEventType::SuspiciousActivity,
                SecurityLevel::Info,
            )
            .with_detail("seq", i);
            log.log_event(event).await;
        }

        let events = log.get_events(None, None, None).await;
        assert_eq!(events.len(), MAX_STORED_EVENTS);
        // Most recent first; the oldest 10 were evicted
        assert_eq!(events[0].details.get("seq"), Some(&DetailValue::Int(1009)));
        assert_eq!(
            events[MAX_STORED_EVENTS - 1].details.get("seq"),
            Some(&DetailValue::Int(10))
        );
    }

    #[tokio::test]
    async fn test_get_events_filters_and_caps() {
        let (_, log) = new_log().await;

        log.log_rate_limit_violation("hourly", 100, 100).await;
        log.log_api_key_missing("gemini", "gemini").await;
        log.log_rate_limit_violation("daily", 1000, 1000).await;

        let violations = log
            .get_events(Some(SecurityEventType::RateLimitViolation), None, None)
            .await;
        assert_eq!(violations.len(), 2);
        assert_eq!(
            violations[0].details.get("window"),
            Some(&DetailValue::String("daily".to_string()))
        );

        let errors = log.get_events(None, Some(SecurityLevel::Error), None).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event_type, SecurityEventType::ApiKeyMissing);

        let capped = log.get_events(None, None, Some(1)).await;
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_statistics_aggregation() {
        let (_, log) = new_log().await;

        log.log_rate_limit_violation("hourly", 5, 5).await;
        log.log_data_tampering("storage", "checksum mismatch").await;
        log.log_api_key_invalid("grok", "grok", "too_short").await;

        let stats = log.get_statistics().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.last_24h, 3);
        assert_eq!(stats.last_7d, 3);
        assert_eq!(stats.by_type.get("rate_limit_violation"), Some(&1));
        assert_eq!(stats.by_level.get("critical"), Some(&1));
        assert_eq!(stats.recent_critical.len(), 1);
        assert_eq!(
            stats.recent_critical[0].event_type,
            SecurityEventType::DataTampering
        );
    }

    #[tokio::test]
    async fn test_clear_stored_events() {
        let (_, log) = new_log().await;

        log.log_configuration_error("bad remote snapshot").await;
        assert_eq!(log.get_statistics().await.total, 1);

        log.clear_stored_events().await;
        assert_eq!(log.get_statistics().await.total, 0);
    }

    #[tokio::test]
    async fn test_telemetry_threshold_gates_delivery() {
        let settings = SettingsStore::open(Arc::new(InMemorySettingsRepository::new())).await;
        let sink = Arc::new(RecordingSink::new(false));
        let log = SecurityEventLog::new(settings).with_telemetry(sink.clone());

        // Info is below the default warning threshold
        log.log_event(SecurityEvent::new(
            SecurityEventType::SessionExpired,
            SecurityLevel::Info,
        ))
        .await;
        assert!(sink.sent.lock().unwrap().is_empty());

        log.log_data_tampering("db", "row hash mismatch").await;
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_never_drops_stored_event() {
        let settings = SettingsStore::open(Arc::new(InMemorySettingsRepository::new())).await;
        let sink = Arc::new(RecordingSink::new(true));
        let log = SecurityEventLog::new(settings).with_telemetry(sink);

        log.log_data_tampering("db", "row hash mismatch").await;

        let events = log.get_events(None, None, None).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_store_locally_disabled_keeps_ring_in_memory_only() {
        let repo = Arc::new(InMemorySettingsRepository::new());
        let settings = SettingsStore::open(repo.clone()).await;
        settings
            .update(|s| s.store_events_locally = false)
            .await
            .unwrap();
        let before = repo.document().unwrap();

        let log = SecurityEventLog::new(settings);
        log.log_configuration_error("oops").await;

        // Ring grew in memory, persisted document unchanged
        assert_eq!(log.get_events(None, None, None).await.len(), 1);
        assert_eq!(repo.document().unwrap(), before);
    }

    #[tokio::test]
    async fn test_thresholds_are_persisted() {
        let (settings, log) = new_log().await;

        log.set_console_threshold(SecurityLevel::Error).await;
        log.set_telemetry_threshold(SecurityLevel::Critical).await;

        assert_eq!(
            settings.read(|s| s.console_log_level).await,
            SecurityLevel::Error
        );
        assert_eq!(
            settings.read(|s| s.telemetry_log_level).await,
            SecurityLevel::Critical
        );
    }
}
