//! Encryption at rest: AEAD cipher plus keyring-backed key storage

mod cipher;
mod keystore;

pub use cipher::{CipherError, SymmetricCipher, KEY_LEN};
pub use keystore::{InMemoryKeyStore, KeyringKeyStore, SecureKeyStore};
