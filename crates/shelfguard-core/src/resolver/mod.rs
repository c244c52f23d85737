//! Tiered credential resolution
//!
//! `get` never fails: it walks remote config, the local encrypted store, and
//! the process environment in that order and falls back to a recognizable
//! placeholder. Each tier is read once per call, so a resolution never mixes
//! a stale remote value with a newer local one. Validation helpers return
//! booleans and log the reason as a side effect — these guard user-facing
//! flows that must degrade instead of crash.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crypto::SymmetricCipher;
use crate::events::SecurityEventLog;
use crate::remote_config::RemoteConfigClient;
use crate::settings::SettingsStore;

/// Literal marker every placeholder value contains
pub const PLACEHOLDER_MARKER: &str = "YOUR_";

/// Minimum plausible length of a real API key
pub const MIN_KEY_LENGTH: usize = 20;

/// The API keys this subsystem manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKeyKind {
    Gemini,
    GoogleBooks,
    Grok,
    RevenueCat,
}

impl ApiKeyKind {
    pub const ALL: [ApiKeyKind; 4] = [
        Self::Gemini,
        Self::GoogleBooks,
        Self::Grok,
        Self::RevenueCat,
    ];

    /// Credential name, used as the local storage key
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::GoogleBooks => "google_books",
            Self::Grok => "grok",
            Self::RevenueCat => "revenuecat",
        }
    }

    /// Remote-config key holding this credential
    pub fn remote_key(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini_api_key",
            Self::GoogleBooks => "google_books_api_key",
            Self::Grok => "grok_api_key",
            Self::RevenueCat => "revenuecat_api_key",
        }
    }

    /// Environment variable consulted as the third tier
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::GoogleBooks => "GOOGLE_BOOKS_API_KEY",
            Self::Grok => "GROK_API_KEY",
            Self::RevenueCat => "REVENUECAT_API_KEY",
        }
    }

    /// Last-resort value, always containing [`PLACEHOLDER_MARKER`]
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Gemini => "YOUR_GEMINI_API_KEY_HERE",
            Self::GoogleBooks => "YOUR_GOOGLE_BOOKS_API_KEY_HERE",
            Self::Grok => "YOUR_GROK_API_KEY_HERE",
            Self::RevenueCat => "YOUR_REVENUECAT_API_KEY_HERE",
        }
    }

    /// Fixed literal prefix a well-formed key of this type starts with
    pub fn expected_prefix(&self) -> &'static str {
        match self {
            Self::Gemini | Self::GoogleBooks => "AIza",
            Self::Grok => "xai-",
            Self::RevenueCat => "appl_",
        }
    }
}

impl std::fmt::Display for ApiKeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which tier a resolution came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Remote,
    Local,
    Environment,
    Placeholder,
}

/// A resolved credential; never persisted as a struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: &'static str,
    pub value: String,
    pub source: CredentialSource,
}

/// Orchestrates remote config, the cipher, local settings, and the event log
pub struct CredentialResolver {
    remote: Arc<RemoteConfigClient>,
    cipher: Arc<SymmetricCipher>,
    settings: Arc<SettingsStore>,
    events: Arc<SecurityEventLog>,
}

impl CredentialResolver {
    pub fn new(
        remote: Arc<RemoteConfigClient>,
        cipher: Arc<SymmetricCipher>,
        settings: Arc<SettingsStore>,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        Self {
            remote,
            cipher,
            settings,
            events,
        }
    }

    /// Best available value for this key; never fails
    pub async fn get(&self, kind: ApiKeyKind) -> String {
        self.resolve(kind).await.value
    }

    /// Resolve through the four tiers, first non-empty wins
    pub async fn resolve(&self, kind: ApiKeyKind) -> Credential {
        // Tier 1: whatever remote snapshot was last activated (no fetch)
        let remote_value = self.remote.get_string(kind.remote_key());
        if !remote_value.is_empty() {
            return Credential {
                name: kind.name(),
                value: remote_value,
                source: CredentialSource::Remote,
            };
        }

        // Tier 2: local encrypted store; a decryption failure means "absent"
        if let Some(ciphertext) = self
            .settings
            .read(|s| s.credentials.get(kind.name()).cloned())
            .await
        {
            match self.cipher.decrypt(&ciphertext).await {
                Ok(value) if !value.is_empty() => {
                    return Credential {
                        name: kind.name(),
                        value,
                        source: CredentialSource::Local,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    self.events
                        .log_encryption_failure(kind.name(), &e.to_string())
                        .await;
                }
            }
        }

        // Tier 3: process environment
        if let Ok(value) = std::env::var(kind.env_var()) {
            if !value.is_empty() {
                return Credential {
                    name: kind.name(),
                    value,
                    source: CredentialSource::Environment,
                };
            }
        }

        debug!(key = kind.name(), "Credential unresolved, using placeholder");
        Credential {
            name: kind.name(),
            value: kind.placeholder().to_string(),
            source: CredentialSource::Placeholder,
        }
    }

    /// Refresh remote config, then resolve
    ///
    /// The fetch outcome does not matter for the result: resolution always
    /// proceeds through the tiers once the attempt completes. Concurrent
    /// callers each trigger their own fetch.
    pub async fn get_with_refresh(&self, kind: ApiKeyKind) -> String {
        if let Err(e) = self.remote.fetch_and_activate().await {
            debug!(error = %e, "Remote refresh failed, resolving from remaining tiers");
        }
        self.get(kind).await
    }

    /// Encrypt and persist a credential value
    pub async fn set(&self, kind: ApiKeyKind, value: &str) -> crate::Result<()> {
        let ciphertext = self.cipher.encrypt(value).await?;
        self.settings
            .update(|s| {
                s.credentials.insert(kind.name().to_string(), ciphertext);
            })
            .await?;
        info!(key = kind.name(), "Stored encrypted credential");
        Ok(())
    }

    /// Remove every known credential from local storage
    pub async fn clear(&self) -> crate::Result<()> {
        self.settings
            .update(|s| {
                for kind in ApiKeyKind::ALL {
                    s.credentials.remove(kind.name());
                }
            })
            .await?;
        info!("Cleared all locally stored credentials");
        Ok(())
    }

    /// Redacted preview of a locally stored credential (e.g. `***3456`)
    pub async fn preview(&self, kind: ApiKeyKind) -> Option<String> {
        let ciphertext = self
            .settings
            .read(|s| s.credentials.get(kind.name()).cloned())
            .await?;
        let value = self.cipher.decrypt(&ciphertext).await.ok()?;
        // Count and slice in characters; byte offsets would split multibyte values
        let chars = value.chars().count();
        if chars <= 4 {
            Some("***".to_string())
        } else {
            let tail: String = value.chars().skip(chars - 4).collect();
            Some(format!("***{}", tail))
        }
    }

    /// Shape-check a candidate key value
    ///
    /// Returns false (and logs exactly one event) when the value is missing,
    /// empty, a placeholder, implausibly short, or fails the per-type prefix
    /// rule. A true result logs nothing.
    pub async fn validate(&self, value: Option<&str>, kind: ApiKeyKind, service: &str) -> bool {
        let value = match value {
            Some(v) if !v.is_empty() => v,
            _ => {
                self.events.log_api_key_missing(kind.name(), service).await;
                return false;
            }
        };

        if value.contains(PLACEHOLDER_MARKER) {
            self.events
                .log_api_key_invalid(kind.name(), service, "placeholder")
                .await;
            return false;
        }
        if value.len() < MIN_KEY_LENGTH {
            self.events
                .log_api_key_invalid(kind.name(), service, "too_short")
                .await;
            return false;
        }
        if !value.starts_with(kind.expected_prefix()) {
            self.events
                .log_api_key_invalid(kind.name(), service, "bad_prefix")
                .await;
            return false;
        }
        true
    }

    /// Conjunction of `validate` over every configured credential
    pub async fn validate_all(&self) -> bool {
        let mut all_valid = true;
        for kind in ApiKeyKind::ALL {
            let resolved = self.resolve(kind).await;
            let value = match resolved.source {
                CredentialSource::Placeholder => None,
                _ => Some(resolved.value.as_str()),
            };
            if !self.validate(value, kind, kind.name()).await {
                all_valid = false;
            }
        }
        all_valid
    }

    /// Whether a request timestamp falls inside the allowed skew window
    ///
    /// False results log a timestamp-validation-failure event carrying the
    /// observed delta in seconds.
    pub async fn validate_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        service: &str,
        endpoint: &str,
    ) -> bool {
        let window = self.settings.read(|s| s.request_time_window_secs).await;
        let delta = (Utc::now() - timestamp).num_seconds().abs();
        if delta <= window {
            return true;
        }
        warn!(service, endpoint, delta, window, "Request timestamp outside window");
        self.events
            .log_timestamp_validation_failure(service, endpoint, Some(delta))
            .await;
        false
    }

    /// RFC 3339 variant of [`CredentialResolver::validate_timestamp`]
    ///
    /// A missing or unparsable timestamp is always invalid and logged.
    pub async fn validate_timestamp_str(
        &self,
        raw: Option<&str>,
        service: &str,
        endpoint: &str,
    ) -> bool {
        let parsed = raw.and_then(|r| DateTime::parse_from_rfc3339(r).ok());
        match parsed {
            Some(ts) => {
                self.validate_timestamp(ts.with_timezone(&Utc), service, endpoint)
                    .await
            }
            None => {
                self.events
                    .log_timestamp_validation_failure(service, endpoint, None)
                    .await;
                false
            }
        }
    }

    /// Allowed request-timestamp skew in seconds
    pub async fn request_time_window(&self) -> i64 {
        self.settings.read(|s| s.request_time_window_secs).await
    }

    /// Change the allowed skew (persisted)
    pub async fn set_request_time_window(&self, secs: i64) -> crate::Result<()> {
        self.settings
            .update(|s| s.request_time_window_secs = secs)
            .await?;
        Ok(())
    }

    /// Rotate the encryption key, re-encrypting every stored credential
    ///
    /// Credentials that no longer decrypt are dropped rather than carried
    /// forward as garbage; each drop is logged as an encryption failure.
    pub async fn rotate_encryption_key(&self) -> crate::Result<()> {
        let stored = self.settings.read(|s| s.credentials.clone()).await;

        let mut plaintexts = Vec::new();
        for (name, ciphertext) in stored {
            match self.cipher.decrypt(&ciphertext).await {
                Ok(value) => plaintexts.push((name, value)),
                Err(e) => {
                    self.events
                        .log_encryption_failure(&name, &e.to_string())
                        .await;
                }
            }
        }

        self.cipher.rotate_key().await?;

        let mut reencrypted = Vec::with_capacity(plaintexts.len());
        for (name, value) in plaintexts {
            reencrypted.push((name, self.cipher.encrypt(&value).await?));
        }
        self.settings
            .update(|s| {
                s.credentials.clear();
                s.credentials.extend(reencrypted);
            })
            .await?;

        info!("Rotated encryption key and re-encrypted stored credentials");
        Ok(())
    }
}
