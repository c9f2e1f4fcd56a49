//! Caching of remote lookups
//!
//! Currently only user records are cached; see [`user::UserCache`].

pub mod user;

use std::time::Duration;

use serde::Deserialize;

pub use user::{CacheLookup, CacheStats, UserCache};

/// Default lifetime of a cached user record (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default maximum number of cached user records.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// User cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserCacheConfig {
    /// Lifetime of a cached record (e.g., "30m")
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of entries before the oldest are evicted
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Lifetime of a "no such user" marker; misses are not cached when unset
    #[serde(default, with = "humantime_serde")]
    pub negative_ttl: Option<Duration>,
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

impl Default for UserCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
            negative_ttl: None,
        }
    }
}
