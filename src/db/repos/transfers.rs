use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::error::DbResult, models::OwnershipTransfer};

#[async_trait]
pub trait TransferRepo: Send + Sync {
    /// Insert a pending transfer. A second pending transfer for the same
    /// group is a conflict (unique on group id).
    async fn create(&self, transfer: &OwnershipTransfer) -> DbResult<()>;

    async fn get(&self, id: Uuid) -> DbResult<Option<OwnershipTransfer>>;

    async fn get_by_group(&self, group_id: Uuid) -> DbResult<Option<OwnershipTransfer>>;

    async fn delete(&self, id: Uuid) -> DbResult<()>;

    /// Drop a pending transfer targeting `to_user_id`, as a side effect of
    /// removing that user from the group. Returns rows removed.
    async fn delete_by_group_target(&self, group_id: Uuid, to_user_id: &str) -> DbResult<u64>;

    /// Atomically apply an accepted transfer: the target becomes OWNER,
    /// the previous owner MANAGER, every conversation in the group changes
    /// `owner_user_id`, and the transfer row is deleted.
    async fn accept(&self, id: Uuid) -> DbResult<()>;
}
