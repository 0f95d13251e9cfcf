//! Client configuration.
//!
//! Layered as defaults, then an optional TOML file, then environment
//! variables prefixed with `SWITCHBOARD__` (nested keys joined by `__`, e.g.
//! `SWITCHBOARD__CREDENTIALS__PASSWORD`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use switchboard_protocol::PasswordCredentials;

use crate::error::Result;

pub const APP_NAME: &str = "switchboard";

const ENV_PREFIX: &str = "SWITCHBOARD";

const REDACTED: &str = "********";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheme and host of the login service.
    pub login_base_url: String,
    /// How long spawned connection tasks get to exit after cancellation
    /// before they are aborted.
    pub shutdown_grace_ms: u64,
    pub credentials: PasswordCredentials,
    pub http: HttpConfig,
    pub auth: AuthConfig,
    pub heartbeat: HeartbeatConfig,
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            login_base_url: "https://app.five9.com".to_string(),
            shutdown_grace_ms: 2000,
            credentials: PasswordCredentials::default(),
            http: HttpConfig::default(),
            auth: AuthConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Retry budget for 401 answers while a new login propagates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub ping_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 5,
            monitor_interval_secs: 1,
            timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub metadata_max_age_secs: u64,
    /// Unset means statistics never go stale on their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats_max_age_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_max_age_secs: 3600,
            stats_max_age_secs: None,
        }
    }
}

impl ClientConfig {
    /// Build the layered config. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("login_base_url", defaults.login_base_url.clone())?
            .set_default("http.timeout_secs", defaults.http.timeout_secs as i64)?
            .set_default("auth.max_attempts", defaults.auth.max_attempts as i64)?
            .set_default("auth.retry_delay_ms", defaults.auth.retry_delay_ms as i64)?
            .set_default(
                "heartbeat.ping_interval_secs",
                defaults.heartbeat.ping_interval_secs as i64,
            )?
            .set_default(
                "heartbeat.monitor_interval_secs",
                defaults.heartbeat.monitor_interval_secs as i64,
            )?
            .set_default(
                "heartbeat.timeout_secs",
                defaults.heartbeat.timeout_secs as i64,
            )?
            .set_default(
                "cache.metadata_max_age_secs",
                defaults.cache.metadata_max_age_secs as i64,
            )?
            .set_default("shutdown_grace_ms", defaults.shutdown_grace_ms as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let built = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let heartbeat = &self.heartbeat;
        for (key, value) in [
            ("heartbeat.ping_interval_secs", heartbeat.ping_interval_secs),
            ("heartbeat.monitor_interval_secs", heartbeat.monitor_interval_secs),
        ] {
            if value == 0 {
                let message = format!("{key} must be at least 1");
                return Err(config::ConfigError::Message(message).into());
            }
        }
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/switchboard/config.toml`, when a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.credentials.password.is_empty() {
            copy.credentials.password = REDACTED.to_string();
        }
        copy
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn metadata_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.metadata_max_age_secs)
    }

    pub fn stats_max_age(&self) -> Option<Duration> {
        self.cache.stats_max_age_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl AuthConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl HeartbeatConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
