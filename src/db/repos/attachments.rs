use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{db::error::DbResult, models::Attachment};

#[async_trait]
pub trait AttachmentRepo: Send + Sync {
    async fn create(&self, attachment: &Attachment) -> DbResult<()>;

    async fn get(&self, id: Uuid) -> DbResult<Option<Attachment>>;

    async fn list_by_entry(&self, entry_id: Uuid) -> DbResult<Vec<Attachment>>;

    /// Link an upload to an entry. Linking clears the unlinked-upload TTL.
    async fn link_to_entry(&self, id: Uuid, entry_id: Uuid, group_id: Uuid) -> DbResult<()>;

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    /// Drop unlinked uploads whose TTL has passed. Returns rows removed.
    async fn delete_expired_unlinked(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64>;
}
