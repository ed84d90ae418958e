use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::CacheResult;
use crate::models::{Channel, Entry};

/// One cached memory entry. Content stays ciphertext: the cache never sees
/// plaintext, decryption happens after the read path leaves the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub conversation_group_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub content_type: String,
    #[serde(with = "content_base64")]
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            id: entry.id,
            conversation_id: entry.conversation_id,
            conversation_group_id: entry.conversation_group_id,
            user_id: entry.user_id.clone(),
            content_type: entry.content_type.clone(),
            content: entry.content.clone(),
            created_at: entry.created_at,
        }
    }

    /// Rebuild a full entry row. Epoch and client come from the enclosing
    /// [`CachedEntries`] and the cache key.
    pub fn into_entry(self, client_id: &str, epoch: Option<i64>) -> Entry {
        Entry {
            id: self.id,
            conversation_id: self.conversation_id,
            conversation_group_id: self.conversation_group_id,
            user_id: self.user_id,
            client_id: Some(client_id.to_string()),
            channel: Channel::Memory,
            epoch,
            content_type: self.content_type,
            content: self.content,
            indexed_content: None,
            indexed_at: None,
            created_at: self.created_at,
        }
    }
}

/// The complete latest-epoch set for one (conversation, client), in
/// `(created_at, id)` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntries {
    /// The epoch the set belongs to, None when the set is empty.
    pub epoch: Option<i64>,
    pub entries: Vec<CachedEntry>,
}

impl CachedEntries {
    pub fn from_entries(epoch: Option<i64>, entries: &[Entry]) -> Self {
        Self {
            epoch,
            entries: entries.iter().map(CachedEntry::from_entry).collect(),
        }
    }
}

/// Read-through cache over the latest-epoch memory entries of a
/// (conversation, client).
#[async_trait]
pub trait EntryCache: Send + Sync {
    async fn get(
        &self,
        conversation_id: Uuid,
        client_id: &str,
    ) -> CacheResult<Option<CachedEntries>>;

    async fn set(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        entries: &CachedEntries,
        ttl: Duration,
    ) -> CacheResult<()>;

    async fn remove(&self, conversation_id: Uuid, client_id: &str) -> CacheResult<()>;

    /// Whether the backend can serve reads at all. The disabled backend
    /// returns false and the read path goes straight to the datastore.
    fn available(&self) -> bool;
}

/// No-op backend used when caching is not configured.
pub struct DisabledCache;

#[async_trait]
impl EntryCache for DisabledCache {
    async fn get(&self, _: Uuid, _: &str) -> CacheResult<Option<CachedEntries>> {
        Ok(None)
    }

    async fn set(&self, _: Uuid, _: &str, _: &CachedEntries, _: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn remove(&self, _: Uuid, _: &str) -> CacheResult<()> {
        Ok(())
    }

    fn available(&self) -> bool {
        false
    }
}

/// Ciphertext as base64 in JSON instead of a byte array.
mod content_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &[u8]) -> Entry {
        Entry {
            id: Uuid::now_v7(),
            conversation_id: Uuid::new_v4(),
            conversation_group_id: Uuid::new_v4(),
            user_id: Some("user-1".to_string()),
            client_id: Some("client-1".to_string()),
            channel: Channel::Memory,
            epoch: Some(3),
            content_type: "memory".to_string(),
            content: content.to_vec(),
            indexed_content: None,
            indexed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cached_entries_json_round_trip() {
        let entries = vec![entry(b"[{\"k\":1}]"), entry(b"[{\"k\":2}]")];
        let cached = CachedEntries::from_entries(Some(3), &entries);

        let json = serde_json::to_string(&cached).unwrap();
        let decoded: CachedEntries = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.epoch, Some(3));
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].content, entries[0].content);
        assert_eq!(decoded.entries[1].id, entries[1].id);
    }

    #[test]
    fn test_into_entry_restores_channel_fields() {
        let source = entry(b"[]");
        let cached = CachedEntry::from_entry(&source);
        let restored = cached.into_entry("client-1", Some(3));
        assert_eq!(restored.channel, Channel::Memory);
        assert_eq!(restored.client_id.as_deref(), Some("client-1"));
        assert_eq!(restored.epoch, Some(3));
        assert_eq!(restored.content, source.content);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_inert() {
        let cache = DisabledCache;
        assert!(!cache.available());
        let id = Uuid::new_v4();
        cache
            .set(
                id,
                "c",
                &CachedEntries {
                    epoch: Some(1),
                    entries: vec![],
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(cache.get(id, "c").await.unwrap().is_none());
    }
}
