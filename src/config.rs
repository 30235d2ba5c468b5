//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Remote API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the hosting service API (e.g., "https://api.omg.lol")
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Background synchronization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Interval between timeline polls in seconds (default: 30)
    pub poll_interval_seconds: u64,
    /// Interval at which push channels re-read remote lists (default: 60)
    pub updates_interval_seconds: u64,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn updates_interval(&self) -> Duration {
        Duration::from_secs(self.updates_interval_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            updates_interval_seconds: 60,
        }
    }
}

/// Local cache backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Local cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Storage backend for cached entities
    #[serde(default)]
    pub backend: CacheBackend,
    /// Path to the SQLite cache file (sqlite backend only)
    pub path: Option<PathBuf>,
}

/// Headless sign-in configuration
///
/// The authorization-code exchange happens elsewhere; this only carries
/// an already issued token and the address to select.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    pub access_token: Option<String>,
    pub address: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (OMGSYNC__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("api.base_url", "https://api.omg.lol")?
            .set_default("api.timeout_seconds", 30)?
            .set_default("api.user_agent", "omgsync/0.1.0")?
            .set_default("sync.poll_interval_seconds", 30)?
            .set_default("sync.updates_interval_seconds", 60)?
            .set_default("cache.backend", "memory")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("OMGSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        let base_url = url::Url::parse(&self.api.base_url).map_err(|e| {
            crate::error::AppError::Config(format!("api.base_url is not a valid URL: {e}"))
        })?;
        let host = base_url.host_str().unwrap_or_default();

        if base_url.scheme() != "https" {
            if !is_local_host(host) {
                return Err(crate::error::AppError::Config(
                    "api.base_url must use https for non-local hosts".to_string(),
                ));
            }
            tracing::warn!(
                host = %normalized_host(host),
                "Using plain http against a local API host"
            );
        }

        if self.api.timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "api.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.sync.poll_interval_seconds == 0 || self.sync.updates_interval_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "sync intervals must be greater than 0".to_string(),
            ));
        }

        if self.cache.backend == CacheBackend::Sqlite && self.cache.path.is_none() {
            return Err(crate::error::AppError::Config(
                "cache.path is required when cache.backend=sqlite".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_local_host(host: &str) -> bool {
    let host = normalized_host(host);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
