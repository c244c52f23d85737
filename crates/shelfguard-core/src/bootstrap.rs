//! Wiring for the security subsystem
//!
//! Consumers construct one [`SecurityServices`] at application startup and
//! pass its handles around; there is no process-wide shared instance. The
//! external collaborators (settings repository, secure key store, remote
//! configuration service, optional telemetry sink) are injected, so tests
//! run the full stack against in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::crypto::{SecureKeyStore, SymmetricCipher};
use crate::events::{SecurityEventLog, TelemetrySink};
use crate::rate_limit::RateLimiter;
use crate::remote_config::{RemoteConfigClient, RemoteConfigService};
use crate::resolver::CredentialResolver;
use crate::settings::{SettingsRepository, SettingsStore};

/// All service handles, wired once
pub struct SecurityServices {
    pub settings: Arc<SettingsStore>,
    pub events: Arc<SecurityEventLog>,
    pub cipher: Arc<SymmetricCipher>,
    pub remote_config: Arc<RemoteConfigClient>,
    pub rate_limiter: Arc<RateLimiter>,
    pub resolver: Arc<CredentialResolver>,
}

/// Builder over the injected collaborators
pub struct SecurityServicesBuilder {
    config: Config,
    settings_repository: Arc<dyn SettingsRepository>,
    key_store: Arc<dyn SecureKeyStore>,
    remote_service: Arc<dyn RemoteConfigService>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl SecurityServicesBuilder {
    pub fn new(
        settings_repository: Arc<dyn SettingsRepository>,
        key_store: Arc<dyn SecureKeyStore>,
        remote_service: Arc<dyn RemoteConfigService>,
    ) -> Self {
        Self {
            config: Config::default(),
            settings_repository,
            key_store,
            remote_service,
            telemetry: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub async fn build(self) -> SecurityServices {
        let settings = SettingsStore::open(self.settings_repository).await;

        let mut event_log = SecurityEventLog::new(settings.clone());
        if let Some(sink) = self.telemetry {
            event_log = event_log.with_telemetry(sink);
        }
        let events = Arc::new(event_log);

        let cipher = Arc::new(SymmetricCipher::new(self.key_store));

        let remote_config = Arc::new(
            RemoteConfigClient::new(self.remote_service).with_retry_schedule(
                self.config.remote.max_fetch_attempts,
                Duration::from_millis(self.config.remote.retry_base_delay_ms),
            ),
        );

        let rate_limiter = Arc::new(
            RateLimiter::open(
                settings.clone(),
                events.clone(),
                self.config.rate.hourly_limit,
                self.config.rate.daily_limit,
            )
            .await,
        );

        let resolver = Arc::new(CredentialResolver::new(
            remote_config.clone(),
            cipher.clone(),
            settings.clone(),
            events.clone(),
        ));

        SecurityServices {
            settings,
            events,
            cipher,
            remote_config,
            rate_limiter,
            resolver,
        }
    }
}
