use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Memory-entry cache configuration.
///
/// The cache holds the latest-epoch memory entries per
/// (conversation, client) so that LATEST memory reads skip the
/// ancestry-filtered datastore query.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// No caching. Every memory read goes to the datastore.
    #[default]
    None,

    /// In-process cache. Good for single-node deployments; each replica
    /// caches independently.
    Memory(MemoryCacheConfig),

    /// Redis cache, shared across replicas.
    #[cfg(feature = "redis")]
    Redis(RedisCacheConfig),
}

impl CacheConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, CacheConfig::None)
    }

    /// Per-entry TTL in seconds. Zero means "until evicted by a writer or
    /// by capacity".
    pub fn ttl_secs(&self) -> u64 {
        match self {
            CacheConfig::None => 0,
            CacheConfig::Memory(c) => c.ttl_secs,
            #[cfg(feature = "redis")]
            CacheConfig::Redis(c) => c.ttl_secs,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::None => Ok(()),
            CacheConfig::Memory(c) => c.validate(),
            #[cfg(feature = "redis")]
            CacheConfig::Redis(c) => c.validate(),
        }
    }
}

/// In-process cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    /// Maximum number of cached (conversation, client) keys.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Number of keys evicted at once when the cache is full. Expired keys
    /// go first, then least recently used.
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,

    /// TTL for cached keys in seconds. 0 disables expiry.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            eviction_batch_size: default_eviction_batch_size(),
            ttl_secs: default_ttl(),
        }
    }
}

impl MemoryCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Memory cache max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

fn default_eviction_batch_size() -> usize {
    100
}

fn default_ttl() -> u64 {
    3600 // 1 hour
}

/// Redis cache configuration.
#[cfg(feature = "redis")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    pub url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_redis_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all cache keys.
    /// Useful when sharing a Redis instance with other applications.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL for cached keys in seconds. 0 disables expiry.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

#[cfg(feature = "redis")]
impl RedisCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(feature = "redis")]
fn default_redis_timeout() -> u64 {
    5
}

#[cfg(feature = "redis")]
fn default_key_prefix() -> String {
    "engram:".to_string()
}
