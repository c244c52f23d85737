//! Shelfguard Core Library
//!
//! Client-side secret resolution and security telemetry for metered
//! third-party APIs:
//! - Tiered credential resolution (remote config, encrypted local store,
//!   environment, placeholder)
//! - AES-256-GCM encryption at rest with a keyring-held master key
//! - Sliding-window hourly/daily rate limiting per device
//! - Bounded, typed security audit log with best-effort sinks
//! - Remote configuration client with retry and typed accessors
//!
//! Nothing here is fatal by design: this subsystem sits in front of paid
//! external APIs and fails toward "deny" or "placeholder", never a crash.

pub mod bootstrap;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod rate_limit;
pub mod remote_config;
pub mod resolver;
pub mod settings;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bootstrap::{SecurityServices, SecurityServicesBuilder};
    pub use crate::config::Config;
    pub use crate::crypto::{SecureKeyStore, SymmetricCipher};
    pub use crate::error::{Error, Result};
    pub use crate::events::{
        DetailValue, SecurityEvent, SecurityEventLog, SecurityEventType, SecurityLevel,
        TelemetrySink,
    };
    pub use crate::rate_limit::RateLimiter;
    pub use crate::remote_config::{RemoteConfigClient, RemoteConfigService, RemoteValue};
    pub use crate::resolver::{ApiKeyKind, CredentialResolver, CredentialSource};
    pub use crate::settings::{SettingsRepository, SettingsStore};
}
