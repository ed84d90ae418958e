use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    entries::{EntryService, next_entry_id},
    error::{ServiceError, ServiceResult},
};
use crate::{
    cache::EntryCache,
    crypto::ContentCrypto,
    db::{DbPool, cursor::truncate_to_millis},
    models::{AppendRequest, Channel, Conversation, Entry, EntryView, SyncRequest, SyncResult},
};

/// The memory-sync state machine.
///
/// A sync carries the client's complete intended memory content for its
/// current epoch. Against the stored latest epoch it resolves to one of:
/// no-op, prefix-extend (append the delta tail in the same epoch), clear
/// (new epoch holding `[]`), or diverge (new epoch holding the incoming
/// content).
#[derive(Clone)]
pub struct MemorySyncService {
    db: Arc<DbPool>,
    crypto: Arc<ContentCrypto>,
    entries: EntryService,
    cache: Arc<dyn EntryCache>,
    /// Serializes syncs per (conversation, client). Two racers observing
    /// the same latest epoch would otherwise both diverge and write
    /// duplicate epochs.
    locks: Arc<DashMap<(Uuid, String), Arc<Mutex<()>>>>,
}

impl MemorySyncService {
    pub fn new(
        db: Arc<DbPool>,
        crypto: Arc<ContentCrypto>,
        entries: EntryService,
        cache: Arc<dyn EntryCache>,
    ) -> Self {
        Self {
            db,
            crypto,
            entries,
            cache,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, conversation_id: Uuid, client_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((conversation_id, client_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Reconcile the client's declared memory with server state. Requires
    /// WRITER; auto-creates a missing conversation like append does.
    pub async fn sync(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        request: SyncRequest,
    ) -> ServiceResult<SyncResult> {
        if request.client_id.is_empty() {
            return Err(ServiceError::Forbidden);
        }

        let lock = self.lock_for(conversation_id, &request.client_id);
        let _guard = lock.lock().await;

        let append_shape = AppendRequest {
            entries: Vec::new(),
            client_id: Some(request.client_id.clone()),
            forked_at_conversation_id: request.forked_at_conversation_id,
            forked_at_entry_id: request.forked_at_entry_id,
        };
        let (conversation, _created) = self
            .entries
            .resolve_or_create(user_id, conversation_id, &append_shape)
            .await?;

        let (latest_epoch, latest_entries) = self
            .latest_via_cache(&conversation, &request.client_id)
            .await?;

        let existing = self.concat_decrypted(&latest_entries)?;
        let incoming = &request.content;

        // No-op: nothing changed (or nothing exists on either side).
        if *incoming == existing {
            return Ok(SyncResult {
                no_op: true,
                epoch_incremented: false,
                epoch: latest_epoch,
                entry: None,
            });
        }

        let first_content_type = latest_entries.first().map(|e| e.content_type.as_str());
        let is_prefix_extend = latest_epoch.is_some()
            && existing.len() < incoming.len()
            && incoming[..existing.len()] == existing[..]
            && first_content_type == Some(request.content_type.as_str());

        let (epoch, epoch_incremented, content) = if is_prefix_extend {
            (
                latest_epoch,
                false,
                incoming[existing.len()..].to_vec(),
            )
        } else if incoming.is_empty() && !existing.is_empty() {
            // Clear: a fresh epoch holding the empty array.
            (latest_epoch.map(|e| e + 1), true, Vec::new())
        } else {
            // Diverge. The increment flag reports whether a prior latest
            // existed; the first epoch of a conversation is not counted
            // as an increment.
            (
                Some(latest_epoch.unwrap_or(0) + 1),
                latest_epoch.is_some(),
                incoming.clone(),
            )
        };

        let view = self
            .insert_memory_entry(user_id, &conversation, &request, epoch, content)
            .await?;

        self.entries
            .refresh_memory_cache(&conversation, &request.client_id)
            .await?;

        tracing::debug!(
            conversation_id = %conversation.id,
            client_id = %request.client_id,
            epoch = ?epoch,
            epoch_incremented,
            "Memory sync applied"
        );

        Ok(SyncResult {
            no_op: false,
            epoch_incremented,
            epoch,
            entry: Some(view),
        })
    }

    /// Latest-epoch read through the cache, falling back to the
    /// ancestry-filtered datastore query on miss.
    async fn latest_via_cache(
        &self,
        conversation: &Conversation,
        client_id: &str,
    ) -> ServiceResult<(Option<i64>, Vec<Entry>)> {
        if self.cache.available()
            && let Some(cached) = self.cache.get(conversation.id, client_id).await?
        {
            let epoch = cached.epoch;
            let entries = cached
                .entries
                .into_iter()
                .map(|e| e.into_entry(client_id, epoch))
                .collect();
            return Ok((epoch, entries));
        }
        self.entries.latest_memory_set(conversation, client_id).await
    }

    /// JSON-concatenation of the decrypted content arrays, row order.
    fn concat_decrypted(&self, entries: &[Entry]) -> ServiceResult<Vec<serde_json::Value>> {
        let mut combined = Vec::new();
        for entry in entries {
            let plaintext = self.crypto.decrypt(&entry.content)?;
            let mut content: Vec<serde_json::Value> = serde_json::from_slice(&plaintext)
                .map_err(|e| {
                    ServiceError::Internal(format!("Stored content is not JSON: {}", e))
                })?;
            combined.append(&mut content);
        }
        Ok(combined)
    }

    async fn insert_memory_entry(
        &self,
        user_id: &str,
        conversation: &Conversation,
        request: &SyncRequest,
        epoch: Option<i64>,
        content: Vec<serde_json::Value>,
    ) -> ServiceResult<EntryView> {
        let plaintext =
            serde_json::to_vec(&content).map_err(|e| ServiceError::Internal(e.to_string()))?;
        let row = Entry {
            id: next_entry_id(),
            conversation_id: conversation.id,
            conversation_group_id: conversation.conversation_group_id,
            user_id: Some(user_id.to_string()),
            client_id: Some(request.client_id.clone()),
            channel: Channel::Memory,
            epoch,
            content_type: request.content_type.clone(),
            content: self.crypto.encrypt(&plaintext)?,
            indexed_content: None,
            indexed_at: None,
            created_at: truncate_to_millis(Utc::now()),
        };
        self.db.entries().insert_batch(std::slice::from_ref(&row)).await?;

        Ok(EntryView {
            id: row.id,
            conversation_id: row.conversation_id,
            conversation_group_id: row.conversation_group_id,
            user_id: row.user_id,
            client_id: row.client_id,
            channel: row.channel,
            epoch: row.epoch,
            content_type: row.content_type,
            content,
            indexed_at: None,
            created_at: row.created_at,
        })
    }
}
