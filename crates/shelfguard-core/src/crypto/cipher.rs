//! Authenticated encryption of secrets at rest
//!
//! AES-256-GCM with a per-call random nonce. The wire form of a ciphertext is
//! `base64(nonce ‖ ciphertext ‖ tag)`, one transportable string. Decryption
//! failures are a single opaque error: distinguishing a bad encoding from a
//! wrong key or a flipped bit would leak which check rejected the input.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::keystore::SecureKeyStore;

/// Length of the AES-256 key in bytes
pub const KEY_LEN: usize = 32;

/// Length of the GCM nonce in bytes
const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes
const TAG_LEN: usize = 16;

/// Errors from the cipher and its key store
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// Malformed encoding, wrong key, or tampered bytes — deliberately opaque
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("key store error: {0}")]
    KeyStore(String),

    /// The persisted key blob could not be decoded into a valid key
    #[error("stored encryption key is malformed")]
    MalformedKey,
}

/// 256-bit master key, zeroized when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    fn from_hex(blob: &str) -> Result<Self, CipherError> {
        let decoded = hex::decode(blob).map_err(|_| CipherError::MalformedKey)?;
        let bytes: [u8; KEY_LEN] = decoded.try_into().map_err(|_| CipherError::MalformedKey)?;
        Ok(Self { bytes })
    }
}

/// AEAD cipher over an injected [`SecureKeyStore`]
///
/// The key is created lazily on first use and cached; creation is
/// single-flighted so concurrent first callers converge on one key. No
/// accessor exposes raw key bytes.
pub struct SymmetricCipher {
    store: Arc<dyn SecureKeyStore>,
    key: Mutex<Option<EncryptionKey>>,
}

impl SymmetricCipher {
    pub fn new(store: Arc<dyn SecureKeyStore>) -> Self {
        Self {
            store,
            key: Mutex::new(None),
        }
    }

    /// Load the key from the store, creating and persisting one if absent
    ///
    /// Idempotent under concurrent first use: the cache mutex is held across
    /// the load-or-create, so exactly one key is ever generated.
    async fn get_or_create_key(&self) -> Result<EncryptionKey, CipherError> {
        let mut cached = self.key.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.store.get().await? {
            Some(blob) => EncryptionKey::from_hex(&blob)?,
            None => {
                let key = EncryptionKey::generate();
                self.store.set(&key.to_hex()).await?;
                info!("Generated and stored new symmetric encryption key");
                key
            }
        };

        *cached = Some(key.clone());
        Ok(key)
    }

    /// Encrypt a plaintext into a transportable base64 string
    ///
    /// A fresh random nonce per call guarantees two encryptions of the same
    /// plaintext never produce the same ciphertext.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let key = self.get_or_create_key().await?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.bytes));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a string produced by [`SymmetricCipher::encrypt`]
    pub async fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let key = self.get_or_create_key().await?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.bytes));

        let combined = BASE64
            .decode(encoded)
            .map_err(|_| CipherError::DecryptionFailed)?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }

    /// Replace the master key with a freshly generated one
    ///
    /// Callers are responsible for re-encrypting anything sealed under the
    /// old key first (see `CredentialResolver::rotate_encryption_key`).
    pub async fn rotate_key(&self) -> Result<(), CipherError> {
        let mut cached = self.key.lock().await;
        let key = EncryptionKey::generate();
        self.store.set(&key.to_hex()).await?;
        *cached = Some(key);
        info!("Rotated symmetric encryption key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::keystore::InMemoryKeyStore;
    use super::*;

    fn new_cipher() -> SymmetricCipher {
        SymmetricCipher::new(Arc::new(InMemoryKeyStore::new()))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cipher = new_cipher();
        for plaintext in [
            "",
            "AIzaSyA-test-key-0123456789",
            "유니코드 테스트 🔑",
            &"x".repeat(10_000),
        ] {
            let encrypted = cipher.encrypt(plaintext).await.unwrap();
            let decrypted = cipher.decrypt(&encrypted).await.unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[tokio::test]
    async fn test_encrypt_is_nondeterministic() {
        let cipher = new_cipher();
        let a = cipher.encrypt("same plaintext").await.unwrap();
        let b = cipher.encrypt("same plaintext").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).await.unwrap(), "same plaintext");
        assert_eq!(cipher.decrypt(&b).await.unwrap(), "same plaintext");
    }

    #[tokio::test]
    async fn test_tamper_detection() {
        let cipher = new_cipher();
        let encrypted = cipher.encrypt("sensitive value").await.unwrap();
        let mut raw = BASE64.decode(&encrypted).unwrap();

        // Flip a single bit anywhere in nonce, ciphertext, or tag
        for index in [0, NONCE_LEN, raw.len() - 1] {
            raw[index] ^= 0x01;
            let tampered = BASE64.encode(&raw);
            assert!(matches!(
                cipher.decrypt(&tampered).await,
                Err(CipherError::DecryptionFailed)
            ));
            raw[index] ^= 0x01;
        }
    }

    #[tokio::test]
    async fn test_malformed_inputs_fail_opaquely() {
        let cipher = new_cipher();

        for bad in ["", "not base64 !!!", "AAAA", &BASE64.encode([0u8; 10])] {
            assert!(matches!(
                cipher.decrypt(bad).await,
                Err(CipherError::DecryptionFailed)
            ));
        }
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let cipher_a = new_cipher();
        let cipher_b = new_cipher();

        let encrypted = cipher_a.encrypt("secret").await.unwrap();
        assert!(matches!(
            cipher_b.decrypt(&encrypted).await,
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_key() {
        let store = Arc::new(InMemoryKeyStore::new());
        let cipher = Arc::new(SymmetricCipher::new(store.clone()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let cipher = cipher.clone();
            handles.push(tokio::spawn(async move {
                cipher.encrypt(&format!("payload {}", i)).await.unwrap()
            }));
        }
        let ciphertexts: Vec<String> = join_all(handles).await;

        // All callers converged on the single persisted key
        let blob = store.get().await.unwrap().expect("key should exist");
        assert_eq!(blob.len(), KEY_LEN * 2);
        for ct in ciphertexts {
            cipher.decrypt(&ct).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rotate_key_invalidates_old_ciphertexts() {
        let cipher = new_cipher();
        let encrypted = cipher.encrypt("old secret").await.unwrap();

        cipher.rotate_key().await.unwrap();

        assert!(matches!(
            cipher.decrypt(&encrypted).await,
            Err(CipherError::DecryptionFailed)
        ));
        // New encryptions work under the new key
        let fresh = cipher.encrypt("new secret").await.unwrap();
        assert_eq!(cipher.decrypt(&fresh).await.unwrap(), "new secret");
    }

    #[tokio::test]
    async fn test_malformed_stored_key_is_an_error() {
        let store = Arc::new(InMemoryKeyStore::new());
        store.set("not hex at all").await.unwrap();
        let cipher = SymmetricCipher::new(store);

        assert!(matches!(
            cipher.encrypt("x").await,
            Err(CipherError::MalformedKey)
        ));
    }

    async fn join_all(
        handles: Vec<tokio::task::JoinHandle<String>>,
    ) -> Vec<String> {
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }
}
