//! Error types for Shelfguard

use thiserror::Error;

/// Result type alias using Shelfguard's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for operations that do propagate failures
///
/// Most of this subsystem deliberately absorbs errors (validations return
/// booleans, resolution falls back to placeholders); this type covers the
/// explicit mutations — storing credentials, rotating keys — where the
/// caller needs to know the write did not happen.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cipher(#[from] crate::crypto::CipherError),

    #[error(transparent)]
    RemoteConfig(#[from] crate::remote_config::RemoteConfigError),

    #[error(transparent)]
    Settings(#[from] crate::settings::SettingsError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
