mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryEntryCache;
#[cfg(feature = "redis")]
pub use redis::RedisEntryCache;
pub use traits::{CachedEntries, CachedEntry, DisabledCache, EntryCache};

use crate::config::CacheConfig;

/// Build the configured cache backend.
pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<dyn EntryCache>> {
    match config {
        CacheConfig::None => Ok(Arc::new(DisabledCache)),
        CacheConfig::Memory(cfg) => Ok(Arc::new(MemoryEntryCache::new(cfg))),
        #[cfg(feature = "redis")]
        CacheConfig::Redis(cfg) => Ok(Arc::new(RedisEntryCache::from_config(cfg).await?)),
    }
}
