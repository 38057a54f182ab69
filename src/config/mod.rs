//! Service configuration.
//!
//! Tunables come from a TOML file with serde defaults for every knob;
//! secrets come from the environment and are never written to disk. The
//! encryption key is a hard startup precondition — the process refuses to
//! start without a valid 32-byte key rather than run without encryption.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Env var holding the base64-encoded 32-byte master key.
pub const ENCRYPTION_KEY_ENV: &str = "TIMEVAULT_ENCRYPTION_KEY";

/// Env var holding the rate-limit identity hashing secret.
pub const HASH_SECRET_ENV: &str = "TIMEVAULT_HASH_SECRET";

/// Development-only fallback for the identity hashing secret.
const DEV_HASH_SECRET: &str = "timevault-dev-hash-secret";

/// Complete timevault configuration (non-secret part).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP server and storage locations
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// SQLite file for credential records
    #[serde(default = "default_credentials_db")]
    pub credentials_db: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_credentials_db() -> String {
    "timevault.db".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            credentials_db: default_credentials_db(),
        }
    }
}

/// Magic-link issuance limits
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Mandatory wait between issuances for one identity (seconds)
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Fixed-window length (seconds)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Issuances allowed per window
    #[serde(default = "default_quota")]
    pub quota: i64,
}

fn default_cooldown_seconds() -> u64 {
    90
}

fn default_window_seconds() -> u64 {
    3600
}

fn default_quota() -> i64 {
    3
}

impl RateLimitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            window_seconds: default_window_seconds(),
            quota: default_quota(),
        }
    }
}

/// Cache TTLs per operation class, chosen by data volatility: reference data
/// ages slowly, time entries mislead the user within minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_projects_ttl")]
    pub projects_ttl_seconds: u64,
    #[serde(default = "default_activities_ttl")]
    pub activities_ttl_seconds: u64,
    #[serde(default = "default_issues_ttl")]
    pub issues_ttl_seconds: u64,
    #[serde(default = "default_time_entries_ttl")]
    pub time_entries_ttl_seconds: u64,
}

fn default_projects_ttl() -> u64 {
    600
}

fn default_activities_ttl() -> u64 {
    1800
}

fn default_issues_ttl() -> u64 {
    300
}

fn default_time_entries_ttl() -> u64 {
    60
}

impl CacheConfig {
    pub fn projects_ttl(&self) -> Duration {
        Duration::from_secs(self.projects_ttl_seconds)
    }

    pub fn activities_ttl(&self) -> Duration {
        Duration::from_secs(self.activities_ttl_seconds)
    }

    pub fn issues_ttl(&self) -> Duration {
        Duration::from_secs(self.issues_ttl_seconds)
    }

    pub fn time_entries_ttl(&self) -> Duration {
        Duration::from_secs(self.time_entries_ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            projects_ttl_seconds: default_projects_ttl(),
            activities_ttl_seconds: default_activities_ttl(),
            issues_ttl_seconds: default_issues_ttl(),
            time_entries_ttl_seconds: default_time_entries_ttl(),
        }
    }
}

/// Secrets loaded from the environment, held in memory only.
pub struct Secrets {
    /// Base64-encoded master key; validated to 32 bytes by `CryptoBox`
    pub encryption_key_base64: String,
    /// HMAC secret for rate-limit identity hashing
    pub hash_secret: String,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load secrets from the environment.
///
/// The encryption key is mandatory. The hash secret falls back to a
/// non-secret default so development setups work, with a warning — the
/// fallback is unsafe for production.
pub fn load_secrets() -> Result<Secrets> {
    let Ok(encryption_key_base64) = std::env::var(ENCRYPTION_KEY_ENV) else {
        bail!(
            "{} is not set; refusing to start without an encryption key",
            ENCRYPTION_KEY_ENV
        );
    };

    let hash_secret = match std::env::var(HASH_SECRET_ENV) {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            warn!(
                "{} is not set, using the built-in development secret — unsafe for production",
                HASH_SECRET_ENV
            );
            DEV_HASH_SECRET.to_string()
        }
    };

    Ok(Secrets {
        encryption_key_base64,
        hash_secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.rate_limit.cooldown_seconds, 90);
        assert_eq!(config.rate_limit.window_seconds, 3600);
        assert_eq!(config.rate_limit.quota, 3);
        assert_eq!(config.cache.projects_ttl_seconds, 600);
        assert_eq!(config.cache.activities_ttl_seconds, 1800);
        assert_eq!(config.cache.time_entries_ttl_seconds, 60);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:9000"
            credentials_db = "/var/lib/timevault/creds.db"

            [rate_limit]
            cooldown_seconds = 30
            window_seconds = 600
            quota = 5

            [cache]
            projects_ttl_seconds = 120
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.rate_limit.quota, 5);
        assert_eq!(config.rate_limit.cooldown(), Duration::from_secs(30));
        assert_eq!(config.cache.projects_ttl_seconds, 120);
        // Missing knobs fall back to defaults
        assert_eq!(config.cache.activities_ttl_seconds, 1800);
    }

    #[test]
    fn test_partial_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.rate_limit.quota, 3);
        assert_eq!(config.cache.time_entries_ttl(), Duration::from_secs(60));
    }
}
