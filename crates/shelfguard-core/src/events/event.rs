//! Security event taxonomy
//!
//! Events are immutable once constructed and carry only typed detail values,
//! so serialization is total and test comparisons are exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of security event (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    RateLimitViolation,
    TimestampValidationFailure,
    ApiKeyMissing,
    ApiKeyInvalid,
    AuthenticationFailure,
    AuthorizationFailure,
    SuspiciousActivity,
    DataTampering,
    EncryptionFailure,
    DecryptionFailure,
    NetworkSecurityViolation,
    CertificatePinningFailure,
    SessionExpired,
    ConfigurationError,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitViolation => "rate_limit_violation",
            Self::TimestampValidationFailure => "timestamp_validation_failure",
            Self::ApiKeyMissing => "api_key_missing",
            Self::ApiKeyInvalid => "api_key_invalid",
            Self::AuthenticationFailure => "authentication_failure",
            Self::AuthorizationFailure => "authorization_failure",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::DataTampering => "data_tampering",
            Self::EncryptionFailure => "encryption_failure",
            Self::DecryptionFailure => "decryption_failure",
            Self::NetworkSecurityViolation => "network_security_violation",
            Self::CertificatePinningFailure => "certificate_pinning_failure",
            Self::SessionExpired => "session_expired",
            Self::ConfigurationError => "configuration_error",
        }
    }

    /// Default severity used by the convenience logging methods
    pub fn default_level(&self) -> SecurityLevel {
        match self {
            Self::RateLimitViolation => SecurityLevel::Warning,
            Self::TimestampValidationFailure => SecurityLevel::Error,
            Self::ApiKeyMissing => SecurityLevel::Error,
            Self::ApiKeyInvalid => SecurityLevel::Error,
            Self::AuthenticationFailure => SecurityLevel::Warning,
            Self::AuthorizationFailure => SecurityLevel::Error,
            Self::SuspiciousActivity => SecurityLevel::Warning,
            Self::DataTampering => SecurityLevel::Critical,
            Self::EncryptionFailure => SecurityLevel::Error,
            Self::DecryptionFailure => SecurityLevel::Error,
            Self::NetworkSecurityViolation => SecurityLevel::Error,
            Self::CertificatePinningFailure => SecurityLevel::Critical,
            Self::SessionExpired => SecurityLevel::Info,
            Self::ConfigurationError => SecurityLevel::Error,
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a security event, ordered least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed event detail payload
///
/// Closed set of variants instead of arbitrary JSON, so every detail map
/// serializes deterministically (`BTreeMap` keeps key order stable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<DetailValue>),
    Map(BTreeMap<String, DetailValue>),
}

impl From<bool> for DetailValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for DetailValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for DetailValue {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for DetailValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for DetailValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for DetailValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// An immutable security audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub event_type: SecurityEventType,
    /// Severity
    pub level: SecurityLevel,
    /// Service the event relates to, if any (e.g. "gemini")
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service: Option<String>,
    /// Endpoint the event relates to, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub endpoint: Option<String>,
    /// Typed detail payload (never secret material)
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub details: BTreeMap<String, DetailValue>,
    /// Human-readable error description, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl SecurityEvent {
    /// Create an event stamped with the current time
    pub fn new(event_type: SecurityEventType, level: SecurityLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            level,
            service: None,
            endpoint: None,
            details: BTreeMap::new(),
            error_message: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Age of the event relative to `now`, in whole seconds
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}
