//! Static configuration with file persistence
//!
//! Construction-time parameters for the security subsystem. Runtime state
//! (stored credentials, call timestamps, sink thresholds) lives in the
//! settings document instead; this file only carries the knobs an operator
//! would edit by hand.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::rate_limit::{DEFAULT_DAILY_LIMIT, DEFAULT_HOURLY_LIMIT};
use crate::remote_config::MAX_FETCH_ATTEMPTS;

/// Shelfguard security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rate: RateConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateConfig {
    pub hourly_limit: u32,
    pub daily_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub max_fetch_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate: RateConfig {
                hourly_limit: DEFAULT_HOURLY_LIMIT,
                daily_limit: DEFAULT_DAILY_LIMIT,
            },
            remote: RemoteConfig {
                max_fetch_attempts: MAX_FETCH_ATTEMPTS,
                retry_base_delay_ms: 1000,
            },
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("SHELFGUARD_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("shelfguard")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate.hourly_limit == 0 || self.rate.daily_limit == 0 {
            return Err(anyhow!("Rate limits must be at least 1"));
        }
        if self.rate.hourly_limit > self.rate.daily_limit {
            return Err(anyhow!(
                "Hourly limit ({}) cannot exceed daily limit ({})",
                self.rate.hourly_limit,
                self.rate.daily_limit
            ));
        }
        if self.remote.max_fetch_attempts == 0 {
            return Err(anyhow!("max_fetch_attempts must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate.hourly_limit, 100);
        assert_eq!(config.rate.daily_limit, 1000);
        assert_eq!(config.remote.max_fetch_attempts, 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let mut config = Config::default();
        config.rate.hourly_limit = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.rate.daily_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.rate.hourly_limit, config.rate.hourly_limit);
        assert_eq!(back.remote.retry_base_delay_ms, config.remote.retry_base_delay_ms);
    }
}
