use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{
    access::AccessService,
    error::{ServiceError, ServiceResult},
};
use crate::{
    db::DbPool,
    models::{AccessLevel, Membership},
};

/// Share management: who can read or write a conversation group.
#[derive(Clone)]
pub struct MembershipService {
    db: Arc<DbPool>,
    access: AccessService,
}

impl MembershipService {
    pub fn new(db: Arc<DbPool>, access: AccessService) -> Self {
        Self { db, access }
    }

    /// Grant `target_user_id` access to the conversation's group.
    /// Requires MANAGER. Ownership moves only through transfers, so OWNER
    /// cannot be granted here.
    pub async fn share(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        target_user_id: &str,
        access_level: AccessLevel,
    ) -> ServiceResult<Membership> {
        if access_level == AccessLevel::Owner {
            return Err(ServiceError::Validation(
                "Ownership is granted through transfers, not shares".to_string(),
            ));
        }

        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Manager)
            .await?;

        let membership = Membership {
            conversation_group_id: conversation.conversation_group_id,
            user_id: target_user_id.to_string(),
            access_level,
            created_at: Utc::now(),
        };
        self.db.memberships().insert(&membership).await?;

        tracing::debug!(
            group_id = %conversation.conversation_group_id,
            target = %target_user_id,
            level = access_level.as_str(),
            "Shared conversation group"
        );
        Ok(membership)
    }

    /// Change an existing member's level. Requires MANAGER. The owner's
    /// own membership is immutable here.
    pub async fn update_member(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        target_user_id: &str,
        access_level: AccessLevel,
    ) -> ServiceResult<()> {
        if access_level == AccessLevel::Owner {
            return Err(ServiceError::Validation(
                "Ownership is granted through transfers, not shares".to_string(),
            ));
        }

        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Manager)
            .await?;
        let group_id = conversation.conversation_group_id;

        let target = self
            .db
            .memberships()
            .get(group_id, target_user_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        if target.access_level == AccessLevel::Owner {
            return Err(ServiceError::Validation(
                "The owner's membership cannot be changed".to_string(),
            ));
        }

        self.db
            .memberships()
            .update_level(group_id, target_user_id, access_level)
            .await?;
        Ok(())
    }

    /// Remove a member. Requires MANAGER, except that members may always
    /// remove themselves. Removing the transfer target also drops the
    /// pending transfer.
    pub async fn remove_member(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        target_user_id: &str,
    ) -> ServiceResult<()> {
        let min_level = if user_id == target_user_id {
            AccessLevel::Reader
        } else {
            AccessLevel::Manager
        };
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, min_level)
            .await?;
        let group_id = conversation.conversation_group_id;

        let target = self
            .db
            .memberships()
            .get(group_id, target_user_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        if target.access_level == AccessLevel::Owner {
            return Err(ServiceError::Validation(
                "The owner cannot be removed from the group".to_string(),
            ));
        }

        self.db
            .transfers()
            .delete_by_group_target(group_id, target_user_id)
            .await?;
        self.db.memberships().delete(group_id, target_user_id).await?;
        Ok(())
    }

    /// Every membership of the conversation's group. Requires READER.
    pub async fn list_members(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> ServiceResult<Vec<Membership>> {
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;
        Ok(self
            .db
            .memberships()
            .list_for_group(conversation.conversation_group_id)
            .await?)
    }
}
