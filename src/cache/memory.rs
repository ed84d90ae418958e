use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    error::CacheResult,
    keys::CacheKeys,
    traits::{CachedEntries, EntryCache},
};
use crate::config::MemoryCacheConfig;

struct CacheSlot {
    value: CachedEntries,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl CacheSlot {
    fn new(value: CachedEntries, expires_at: Option<Instant>) -> Self {
        Self {
            value,
            expires_at,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// In-process cache backed by DashMap.
///
/// Each replica caches independently: an epoch bump on one node is not
/// visible to another node's cache until its TTL lapses or its own writer
/// refreshes the key. Multi-node deployments should use the Redis backend.
pub struct MemoryEntryCache {
    slots: DashMap<String, CacheSlot>,
    max_entries: usize,
    eviction_batch_size: usize,
}

impl MemoryEntryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            slots: DashMap::new(),
            max_entries: config.max_entries,
            eviction_batch_size: config.eviction_batch_size.max(1),
        }
    }

    fn evict_if_needed(&self) {
        if self.slots.len() < self.max_entries {
            return;
        }

        // First pass: drop everything already expired.
        self.slots.retain(|_, slot| !slot.is_expired());

        let current_len = self.slots.len();
        if current_len < self.max_entries {
            return;
        }

        // Still full: evict the least recently used keys in one batch.
        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);
        if to_evict == 0 {
            return;
        }

        let mut keys: Vec<_> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), slot.last_accessed))
            .collect();
        keys.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in keys.into_iter().take(to_evict) {
            self.slots.remove(&key);
        }
    }
}

#[async_trait]
impl EntryCache for MemoryEntryCache {
    async fn get(
        &self,
        conversation_id: Uuid,
        client_id: &str,
    ) -> CacheResult<Option<CachedEntries>> {
        let key = CacheKeys::memory_entries(conversation_id, client_id);
        if let Some(mut slot) = self.slots.get_mut(&key) {
            if slot.is_expired() {
                drop(slot);
                self.slots.remove(&key);
                return Ok(None);
            }
            slot.touch();
            Ok(Some(slot.value.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        entries: &CachedEntries,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.evict_if_needed();

        let expires_at = if !ttl.is_zero() {
            Some(Instant::now() + ttl)
        } else {
            None
        };
        let key = CacheKeys::memory_entries(conversation_id, client_id);
        self.slots.insert(key, CacheSlot::new(entries.clone(), expires_at));
        Ok(())
    }

    async fn remove(&self, conversation_id: Uuid, client_id: &str) -> CacheResult<()> {
        let key = CacheKeys::memory_entries(conversation_id, client_id);
        self.slots.remove(&key);
        Ok(())
    }

    fn available(&self) -> bool {
        true
    }
}
