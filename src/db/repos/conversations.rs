use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Cursor, ListResult};
use crate::{
    db::error::DbResult,
    models::{Conversation, ConversationGroup, ListMode},
};

/// Storage-level input for inserting a conversation row. The title is
/// ciphertext: encryption happened in the service layer.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: Uuid,
    pub owner_user_id: String,
    pub title: Option<Vec<u8>>,
    pub metadata: HashMap<String, String>,
    pub conversation_group_id: Uuid,
    pub forked_at_conversation_id: Option<Uuid>,
    pub forked_at_entry_id: Option<Uuid>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub title: Option<Vec<u8>>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Parameters for the admin listing, which is not scoped to any caller's
/// groups.
#[derive(Debug, Clone, Default)]
pub struct AdminConversationListParams {
    pub limit: i64,
    pub cursor: Option<Cursor>,
    /// Return only soft-deleted conversations (trash view).
    pub only_deleted: bool,
    /// Include soft-deleted conversations alongside live ones.
    pub include_deleted: bool,
}

#[async_trait]
pub trait ConversationRepo: Send + Sync {
    /// Insert a root conversation: its group, the conversation row, and
    /// the OWNER membership for `owner_user_id`, in one transaction.
    async fn create_root(&self, input: NewConversation) -> DbResult<Conversation>;

    /// Insert a fork into an existing group. No membership row is created;
    /// memberships are group-scoped.
    async fn create_fork(&self, input: NewConversation) -> DbResult<Conversation>;

    /// Get a conversation by id. With `include_deleted` false, soft-deleted
    /// conversations read as absent.
    async fn get(&self, id: Uuid, include_deleted: bool) -> DbResult<Option<Conversation>>;

    async fn get_group(&self, group_id: Uuid) -> DbResult<Option<ConversationGroup>>;

    /// List non-deleted conversations across the given groups.
    ///
    /// `LATEST_FORK` selects at most one conversation per group (greatest
    /// `updated_at`); all modes page ascending by `(created_at, id)` so
    /// cursors stay stable.
    async fn list_in_groups(
        &self,
        group_ids: &[Uuid],
        mode: ListMode,
        limit: i64,
        cursor: Option<Cursor>,
    ) -> DbResult<ListResult<Conversation>>;

    /// Every conversation in a group, fork metadata included, ordered by
    /// `(created_at, id)`.
    async fn list_group(&self, group_id: Uuid, include_deleted: bool)
    -> DbResult<Vec<Conversation>>;

    /// Unrestricted listing for the admin surface.
    async fn admin_list(
        &self,
        params: AdminConversationListParams,
    ) -> DbResult<ListResult<Conversation>>;

    /// Rewrite title and/or metadata and bump `updated_at`.
    async fn update(&self, id: Uuid, update: ConversationUpdate) -> DbResult<Conversation>;

    /// Set the title only when none is stored yet. Returns whether a title
    /// was written.
    async fn set_title_if_absent(&self, id: Uuid, title: &[u8]) -> DbResult<bool>;

    /// Bump `updated_at` after a history append.
    async fn touch_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// Soft-delete the group and every conversation in it, and hard-delete
    /// memberships and pending transfers so revoked members cannot read
    /// during the retention window. One transaction.
    async fn soft_delete_group(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// Undelete a group and its conversations. Memberships are not
    /// restored. Fails with a conflict when the group is not deleted.
    async fn restore_group(&self, group_id: Uuid) -> DbResult<()>;

    // ==================== Eviction operations ====================

    /// Groups whose `deleted_at` is before the cutoff, capped at `limit`.
    async fn find_evictable_group_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Uuid>>;

    /// Hard-delete groups in dependency order: entries, attachments,
    /// conversations, memberships, transfers, group. Idempotent; returns
    /// the number of group rows removed.
    async fn hard_delete_groups(&self, group_ids: &[Uuid]) -> DbResult<u64>;
}
