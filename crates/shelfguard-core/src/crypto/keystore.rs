//! Secure key storage behind the OS credential store
//!
//! The master encryption key lives in the platform keyring (macOS Keychain,
//! Windows Credential Manager, Linux Secret Service) under a fixed
//! service/account pair. The contract is deliberately tiny: opaque blob
//! get/set/delete.

use async_trait::async_trait;
use keyring::Entry;

use super::CipherError;

/// Service name used for keyring storage
const KEYRING_SERVICE: &str = "shelfguard";

/// Account name of the symmetric master key entry
const KEYRING_ACCOUNT: &str = "symmetric-encryption-key";

/// Opaque blob storage for the master key
#[async_trait]
pub trait SecureKeyStore: Send + Sync {
    /// Stored blob, `None` if no key was ever persisted
    async fn get(&self) -> Result<Option<String>, CipherError>;

    /// Persist the blob, replacing any previous value
    async fn set(&self, blob: &str) -> Result<(), CipherError>;

    /// Remove the blob; removing a missing blob is not an error
    async fn delete(&self) -> Result<(), CipherError>;
}

/// OS keyring-backed key store
#[derive(Debug, Clone)]
pub struct KeyringKeyStore {
    service: String,
    account: String,
}

impl Default for KeyringKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringKeyStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            account: KEYRING_ACCOUNT.to_string(),
        }
    }

    /// Custom service/account names, for tests or side-by-side installs
    pub fn with_names(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, CipherError> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| CipherError::KeyStore(format!("failed to open keyring entry: {}", e)))
    }
}

#[async_trait]
impl SecureKeyStore for KeyringKeyStore {
    async fn get(&self) -> Result<Option<String>, CipherError> {
        let entry = self.entry()?;

        // keyring operations are blocking, so we spawn a blocking task
        let result = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|e| CipherError::KeyStore(format!("task join error: {}", e)))?;

        match result {
            Ok(blob) => Ok(Some(blob)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CipherError::KeyStore(format!(
                "failed to read key from keyring: {}",
                e
            ))),
        }
    }

    async fn set(&self, blob: &str) -> Result<(), CipherError> {
        let entry = self.entry()?;
        let blob = blob.to_string();

        tokio::task::spawn_blocking(move || {
            entry
                .set_password(&blob)
                .map_err(|e| CipherError::KeyStore(format!("failed to store key: {}", e)))
        })
        .await
        .map_err(|e| CipherError::KeyStore(format!("task join error: {}", e)))?
    }

    async fn delete(&self) -> Result<(), CipherError> {
        let entry = self.entry()?;

        tokio::task::spawn_blocking(move || match entry.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CipherError::KeyStore(format!(
                "failed to delete key: {}",
                e
            ))),
        })
        .await
        .map_err(|e| CipherError::KeyStore(format!("task join error: {}", e)))?
    }
}

/// In-memory key store for testing
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    blob: std::sync::Mutex<Option<String>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureKeyStore for InMemoryKeyStore {
    async fn get(&self) -> Result<Option<String>, CipherError> {
        Ok(self.blob.lock().unwrap().clone())
    }

    async fn set(&self, blob: &str) -> Result<(), CipherError> {
        *self.blob.lock().unwrap() = Some(blob.to_string());
        Ok(())
    }

    async fn delete(&self) -> Result<(), CipherError> {
        *self.blob.lock().unwrap() = None;
        Ok(())
    }
}
