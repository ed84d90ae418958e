use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{AccessLevel, Membership},
};

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    async fn get(&self, group_id: Uuid, user_id: &str) -> DbResult<Option<Membership>>;

    async fn list_for_group(&self, group_id: Uuid) -> DbResult<Vec<Membership>>;

    /// Ids of every group the user belongs to, live groups only.
    async fn group_ids_for_user(&self, user_id: &str) -> DbResult<Vec<Uuid>>;

    /// Insert a membership. A duplicate `(group, user)` is a conflict.
    async fn insert(&self, membership: &Membership) -> DbResult<()>;

    /// Change a member's level. `NotFound` when no membership exists.
    async fn update_level(
        &self,
        group_id: Uuid,
        user_id: &str,
        access_level: AccessLevel,
    ) -> DbResult<()>;

    /// Remove a member. `NotFound` when no membership exists.
    async fn delete(&self, group_id: Uuid, user_id: &str) -> DbResult<()>;
}
