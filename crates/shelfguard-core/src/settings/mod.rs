//! Persisted security settings with a single serialization boundary
//!
//! Everything this subsystem stores locally lives in one versioned
//! [`SecuritySettings`] document: encrypted credentials, per-device call
//! timestamps, the audit event ring, and the tunable knobs. The document is
//! read and written as a whole through a [`SettingsRepository`], so there is
//! exactly one place where (de)serialization can go wrong — and when it does,
//! the store falls back to defaults instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::events::{SecurityEvent, SecurityLevel};

/// Current schema version of the settings document
pub const SETTINGS_VERSION: u32 = 1;

/// Default replay-protection window for request timestamps (seconds)
pub const DEFAULT_REQUEST_TIME_WINDOW_SECS: i64 = 300;

/// Errors from the settings persistence layer
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The complete persisted state of the security subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Schema version, bumped on incompatible changes
    pub version: u32,
    /// Stable per-device identifier, created on first use
    pub device_id: Option<String>,
    /// Credential name -> ciphertext (base64 nonce + ciphertext + tag)
    pub credentials: BTreeMap<String, String>,
    /// Device id -> epoch-second call timestamps
    pub api_calls: BTreeMap<String, Vec<f64>>,
    /// Bounded audit event ring, oldest first
    pub events: Vec<SecurityEvent>,
    /// Minimum severity mirrored to the console sink
    pub console_log_level: SecurityLevel,
    /// Minimum severity mirrored to the remote telemetry sink
    pub telemetry_log_level: SecurityLevel,
    /// Whether the event ring is persisted to disk
    pub store_events_locally: bool,
    /// Allowed clock skew for request timestamp validation
    pub request_time_window_secs: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            device_id: None,
            credentials: BTreeMap::new(),
            api_calls: BTreeMap::new(),
            events: Vec::new(),
            console_log_level: SecurityLevel::Info,
            telemetry_log_level: SecurityLevel::Warning,
            store_events_locally: true,
            request_time_window_secs: DEFAULT_REQUEST_TIME_WINDOW_SECS,
        }
    }
}

/// Raw document storage for [`SecuritySettings`]
///
/// Implementations move opaque strings; the typed (de)serialization happens
/// once, inside [`SettingsStore`].
#[async_trait::async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Load the raw document, `None` if nothing was ever saved
    async fn load(&self) -> Result<Option<String>, SettingsError>;

    /// Persist the raw document
    async fn save(&self, document: &str) -> Result<(), SettingsError>;

    /// Remove the persisted document entirely
    async fn remove(&self) -> Result<(), SettingsError>;
}

/// JSON-file backed settings repository
#[derive(Debug, Clone)]
pub struct JsonFileSettingsRepository {
    path: PathBuf,
}

impl JsonFileSettingsRepository {
    /// Create a repository at the default platform data location
    pub fn new() -> anyhow::Result<Self> {
        let dir = if let Ok(custom) = std::env::var("SHELFGUARD_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            dirs::data_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
                .join("shelfguard")
        };
        Ok(Self {
            path: dir.join("security_settings.json"),
        })
    }

    /// Create a repository at an explicit path (useful for tests)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl SettingsRepository for JsonFileSettingsRepository {
    async fn load(&self) -> Result<Option<String>, SettingsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, document: &str) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash mid-write never truncates the document
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<(), SettingsError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory settings repository for testing
#[derive(Debug, Default)]
pub struct InMemorySettingsRepository {
    document: std::sync::Mutex<Option<String>>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository with a raw document before the store opens it
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: std::sync::Mutex::new(Some(document.into())),
        }
    }

    /// Raw document currently held, for assertions
    pub fn document(&self) -> Option<String> {
        self.document.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn load(&self) -> Result<Option<String>, SettingsError> {
        Ok(self.document.lock().unwrap().clone())
    }

    async fn save(&self, document: &str) -> Result<(), SettingsError> {
        *self.document.lock().unwrap() = Some(document.to_string());
        Ok(())
    }

    async fn remove(&self) -> Result<(), SettingsError> {
        *self.document.lock().unwrap() = None;
        Ok(())
    }
}

/// Shared handle over the settings document
///
/// Reads hit an in-memory copy; mutations go through [`SettingsStore::update`],
/// which holds the write lock across the persist so concurrent read-modify-write
/// sequences serialize and the on-disk document always reflects every update.
pub struct SettingsStore {
    repository: Arc<dyn SettingsRepository>,
    state: RwLock<SecuritySettings>,
}

impl SettingsStore {
    /// Open the store, loading the persisted document if present
    ///
    /// A malformed or missing document yields defaults rather than an error;
    /// this layer must never be the reason the host application fails to start.
    pub async fn open(repository: Arc<dyn SettingsRepository>) -> Arc<Self> {
        let state = match repository.load().await {
            Ok(Some(raw)) => match serde_json::from_str::<SecuritySettings>(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(error = %e, "Malformed settings document, starting from defaults");
                    SecuritySettings::default()
                }
            },
            Ok(None) => {
                debug!("No settings document found, starting from defaults");
                SecuritySettings::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load settings, starting from defaults");
                SecuritySettings::default()
            }
        };

        Arc::new(Self {
            repository,
            state: RwLock::new(state),
        })
    }

    /// Read a value out of the current settings
    pub async fn read<T>(&self, f: impl FnOnce(&SecuritySettings) -> T) -> T {
        let state = self.state.read().await;
        f(&state)
    }

    /// Full copy of the current settings
    pub async fn snapshot(&self) -> SecuritySettings {
        self.state.read().await.clone()
    }

    /// Mutate the settings and persist the result
    ///
    /// The write lock is held across the save, so N concurrent updates apply
    /// and persist exactly N times with no lost writes.
    pub async fn update<T>(
        &self,
        f: impl FnOnce(&mut SecuritySettings) -> T,
    ) -> Result<T, SettingsError> {
        let mut state = self.state.write().await;
        let out = f(&mut state);
        let document = serde_json::to_string(&*state)?;
        self.repository.save(&document).await?;
        Ok(out)
    }

    /// Mutate the in-memory settings without touching the repository
    ///
    /// Used when local event storage is disabled: the ring still has to obey
    /// its bound in memory, but nothing is written to disk.
    pub async fn update_memory<T>(&self, f: impl FnOnce(&mut SecuritySettings) -> T) -> T {
        let mut state = self.state.write().await;
        f(&mut state)
    }
}
