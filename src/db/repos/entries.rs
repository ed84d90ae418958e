use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{Channel, Entry},
};

/// A memory epoch made obsolete by a newer one, eligible for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersededEpoch {
    pub conversation_id: Uuid,
    pub client_id: String,
    pub epoch: i64,
}

#[async_trait]
pub trait EntryRepo: Send + Sync {
    /// Insert a batch of fully-prepared entries (ids, ciphertext and the
    /// shared `created_at` assigned by the caller). All-or-nothing.
    async fn insert_batch(&self, entries: &[Entry]) -> DbResult<()>;

    async fn get(&self, id: Uuid) -> DbResult<Option<Entry>>;

    /// Every entry of a group ordered by `(created_at, id)`, optionally
    /// narrowed to a channel and, for memory reads, to one client.
    ///
    /// The ancestry visibility filter runs on top of this stream.
    async fn list_group_entries(
        &self,
        group_id: Uuid,
        channel: Option<Channel>,
        client_id: Option<&str>,
    ) -> DbResult<Vec<Entry>>;

    /// The HISTORY entry immediately preceding `entry_id` within the same
    /// conversation, used to rewrite a fork point to its predecessor.
    /// Fails with `NotFound` when `entry_id` is not a history entry of
    /// `conversation_id`.
    async fn history_predecessor(
        &self,
        conversation_id: Uuid,
        entry_id: Uuid,
    ) -> DbResult<Option<Uuid>>;

    // ==================== Indexing lifecycle ====================

    /// History entries with no `indexed_content` yet, ascending
    /// `(created_at, id)`, resuming after the cursor entry when given.
    async fn list_unindexed(&self, limit: i64, cursor: Option<Uuid>) -> DbResult<Vec<Entry>>;

    /// Entries whose plaintext extract is present but not yet pushed to
    /// the vector index.
    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<Entry>>;

    /// Overwrite `indexed_content`. Only valid for history entries of the
    /// given group; returns whether a row matched.
    async fn set_indexed_content(
        &self,
        entry_id: Uuid,
        group_id: Uuid,
        content: &str,
    ) -> DbResult<bool>;

    /// Mark the vector index step complete.
    async fn set_indexed_at(
        &self,
        entry_id: Uuid,
        group_id: Uuid,
        at: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Substring search over `indexed_content`. `group_ids` scopes the
    /// search to the caller's groups; `None` searches everything (admin).
    async fn search_indexed_content(
        &self,
        query: &str,
        group_ids: Option<&[Uuid]>,
        limit: i64,
    ) -> DbResult<Vec<Entry>>;

    // ==================== Eviction operations ====================

    /// Memory epochs strictly older than their `(conversation, client)`
    /// latest whose newest entry predates the cutoff.
    async fn find_superseded_epochs(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<SupersededEpoch>>;

    /// Delete every entry of one `(conversation, client, epoch)`. Returns
    /// the deleted entry ids so vector cleanup can be enqueued per entry.
    async fn delete_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        epoch: i64,
    ) -> DbResult<Vec<Uuid>>;
}
