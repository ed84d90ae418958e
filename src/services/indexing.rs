use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{entries::EntryService, error::ServiceResult};
use crate::{
    db::DbPool,
    models::{EntryView, IndexEntryRequest},
};

/// Lifecycle hooks for the external full-text/vector indexer.
///
/// The engine never computes embeddings: it maintains the two queues
/// (entries without `indexed_content`, entries not yet in the vector
/// index) and the timestamps that drive them. The indexer is a trusted
/// collaborator, so these operations are not membership-gated.
#[derive(Clone)]
pub struct IndexingService {
    db: Arc<DbPool>,
    entries: EntryService,
}

impl IndexingService {
    pub fn new(db: Arc<DbPool>, entries: EntryService) -> Self {
        Self { db, entries }
    }

    /// Attach indexable plaintext to history entries. Requests whose
    /// entry is not a history entry of the given conversation's group are
    /// skipped. Returns the number of entries indexed.
    pub async fn index_entries(&self, requests: &[IndexEntryRequest]) -> ServiceResult<u64> {
        let mut indexed = 0u64;
        for request in requests {
            let Some(conversation) = self
                .db
                .conversations()
                .get(request.conversation_id, false)
                .await?
            else {
                tracing::debug!(
                    conversation_id = %request.conversation_id,
                    "Skipping index request for unknown conversation"
                );
                continue;
            };

            let matched = self
                .db
                .entries()
                .set_indexed_content(
                    request.entry_id,
                    conversation.conversation_group_id,
                    &request.indexed_content,
                )
                .await?;
            if matched {
                indexed += 1;
            } else {
                tracing::debug!(
                    entry_id = %request.entry_id,
                    conversation_id = %request.conversation_id,
                    "Skipping index request for entry outside the conversation's group"
                );
            }
        }
        Ok(indexed)
    }

    /// History entries still missing `indexed_content`, oldest first.
    pub async fn list_unindexed_entries(
        &self,
        limit: i64,
        cursor: Option<Uuid>,
    ) -> ServiceResult<Vec<EntryView>> {
        let entries = self.db.entries().list_unindexed(limit, cursor).await?;
        entries.iter().map(|e| self.entries.to_view(e)).collect()
    }

    /// Entries whose plaintext extract awaits the vector index step.
    pub async fn find_entries_pending_vector_indexing(
        &self,
        limit: i64,
    ) -> ServiceResult<Vec<EntryView>> {
        let entries = self.db.entries().find_pending_vector_indexing(limit).await?;
        entries.iter().map(|e| self.entries.to_view(e)).collect()
    }

    /// Mark the vector index step complete for one entry.
    pub async fn set_indexed_at(
        &self,
        entry_id: Uuid,
        group_id: Uuid,
        at: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        Ok(self.db.entries().set_indexed_at(entry_id, group_id, at).await?)
    }
}
