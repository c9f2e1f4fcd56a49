//! Configuration parsing and structures

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::prewarm::{DEFAULT_REFRESH_BUFFER, DEFAULT_RETRY_INTERVAL};
use crate::auth::token::DEFAULT_EXPIRY_BUFFER;
use crate::auth::{Credentials, PrewarmConfig};
use crate::cache::UserCacheConfig;
use crate::client::RetryPolicy;
use crate::env::substitute_env_vars;
use crate::transport::http::DEFAULT_TIMEOUT;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ticketing API connection
    pub remote: RawRemoteConfig,

    #[serde(default)]
    pub token: TokenConfig,

    /// User cache
    #[serde(default)]
    pub cache: UserCacheConfig,

    #[serde(default)]
    pub prewarming: RawPrewarmingConfig,

    /// Retry of transient failures
    #[serde(default)]
    pub retry: RawRetryConfig,
}

/// Ticketing API connection before environment substitution
#[derive(Debug, Clone, Deserialize)]
pub struct RawRemoteConfig {
    /// API base URL, e.g. `http://nsp.local:1900/api/PublicApi`
    pub base_url: String,

    /// Service account email
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Per-request timeout (e.g., "30s")
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Token handling
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// A token expiring within this window is treated as stale (e.g., "5m")
    #[serde(default = "default_expiry_buffer", with = "humantime_serde")]
    pub expiry_buffer: Duration,
}

fn default_expiry_buffer() -> Duration {
    DEFAULT_EXPIRY_BUFFER
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
        }
    }
}

/// Background token refresh
#[derive(Debug, Clone, Deserialize)]
pub struct RawPrewarmingConfig {
    /// Start pre-warming at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Refresh this long before expiry (e.g., "5m")
    #[serde(default = "default_refresh_buffer", with = "humantime_serde")]
    pub refresh_buffer: Duration,

    /// Delay before retrying a failed refresh (e.g., "5m")
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

fn default_true() -> bool {
    true
}

fn default_refresh_buffer() -> Duration {
    DEFAULT_REFRESH_BUFFER
}

fn default_retry_interval() -> Duration {
    DEFAULT_RETRY_INTERVAL
}

impl Default for RawPrewarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Retry settings; missing values take the defaults of [`RetryPolicy`]
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRetryConfig {
    pub max_attempts: Option<u32>,

    #[serde(default, with = "humantime_serde")]
    pub multiplier: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub min_wait: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub max_wait: Option<Duration>,

    /// Retry create/update calls too (may duplicate a ticket when a
    /// timed-out request did reach the server)
    pub retry_mutations: Option<bool>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    pub remote: RemoteConfig,

    pub token: TokenConfig,

    pub cache: UserCacheConfig,

    pub prewarming: PrewarmingConfig,

    pub retry: RetryPolicy,

    pub retry_mutations: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Ticketing API connection (resolved)
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub timeout: Duration,
}

/// Background token refresh (resolved)
#[derive(Debug, Clone)]
pub struct PrewarmingConfig {
    pub enabled: bool,
    pub schedule: PrewarmConfig,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, substituting environment
    /// variables in the connection settings
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            remote,
            token,
            cache,
            prewarming,
            retry,
        } = self;

        let remote = RemoteConfig {
            base_url: substitute_env_vars(&remote.base_url)?,
            credentials: Credentials::new(
                substitute_env_vars(&remote.username)?,
                substitute_env_vars(&remote.password)?,
            ),
            timeout: remote.timeout,
        };

        let defaults = RetryPolicy::default();
        let policy = RetryPolicy {
            max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
            multiplier: retry.multiplier.unwrap_or(defaults.multiplier),
            min_wait: retry.min_wait.unwrap_or(defaults.min_wait),
            max_wait: retry.max_wait.unwrap_or(defaults.max_wait),
        };

        Ok(Config {
            logging,
            remote,
            token,
            cache,
            prewarming: PrewarmingConfig {
                enabled: prewarming.enabled,
                schedule: PrewarmConfig {
                    refresh_buffer: prewarming.refresh_buffer,
                    retry_interval: prewarming.retry_interval,
                },
            },
            retry: policy,
            retry_mutations: retry.retry_mutations.unwrap_or(true),
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.remote.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "remote.base_url is required".to_string(),
            ));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "remote.base_url must be an http(s) URL: {}",
                base_url
            )));
        }
        if self.remote.credentials.username.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "remote.username is required".to_string(),
            ));
        }
        if self.remote.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "remote.timeout must be positive".to_string(),
            ));
        }

        if self.cache.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "cache.max_size must be at least 1".to_string(),
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "cache.ttl must be positive".to_string(),
            ));
        }

        if self.prewarming.schedule.retry_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "prewarming.retry_interval must be positive".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.min_wait > self.retry.max_wait {
            return Err(ConfigError::ValidationError(format!(
                "retry.min_wait ({:?}) exceeds retry.max_wait ({:?})",
                self.retry.min_wait, self.retry.max_wait
            )));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
