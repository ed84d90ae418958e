use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{
    error::{CacheError, CacheResult},
    keys::CacheKeys,
    traits::{CachedEntries, EntryCache},
};
use crate::config::RedisCacheConfig;

/// Redis-backed entry cache, shared across replicas.
///
/// Values are JSON with base64 ciphertext. An epoch bump written by any
/// replica is immediately visible to all of them.
pub struct RedisEntryCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisEntryCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;

        // Fail fast on a bad URL or unreachable server instead of at the
        // first cache call.
        let connect = client.get_multiplexed_async_connection();
        let mut conn = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            connect,
        )
        .await
        .map_err(|_| CacheError::Internal("Redis connection timed out".to_string()))??;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await?;

        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn prefixed_key(&self, conversation_id: Uuid, client_id: &str) -> String {
        format!(
            "{}{}",
            self.key_prefix,
            CacheKeys::memory_entries(conversation_id, client_id)
        )
    }

    async fn connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl EntryCache for RedisEntryCache {
    async fn get(
        &self,
        conversation_id: Uuid,
        client_id: &str,
    ) -> CacheResult<Option<CachedEntries>> {
        let mut conn = self.connection().await?;
        let key = self.prefixed_key(conversation_id, client_id);
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| CacheError::Deserialization(e.to_string()))
        })
        .transpose()
    }

    async fn set(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        entries: &CachedEntries,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let key = self.prefixed_key(conversation_id, client_id);
        let json = serde_json::to_string(entries)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        if ttl.is_zero() {
            conn.set::<_, _, ()>(&key, json).await?;
        } else {
            conn.set_ex::<_, _, ()>(&key, json, ttl.as_secs().max(1)).await?;
        }
        Ok(())
    }

    async fn remove(&self, conversation_id: Uuid, client_id: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let key = self.prefixed_key(conversation_id, client_id);
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }

    fn available(&self) -> bool {
        true
    }
}
