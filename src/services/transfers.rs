use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{
    access::AccessService,
    error::{ServiceError, ServiceResult},
};
use crate::{
    db::DbPool,
    models::{AccessLevel, OwnershipTransfer},
};

/// Pending ownership handovers, at most one per group.
#[derive(Clone)]
pub struct TransferService {
    db: Arc<DbPool>,
    access: AccessService,
}

impl TransferService {
    pub fn new(db: Arc<DbPool>, access: AccessService) -> Self {
        Self { db, access }
    }

    /// Offer ownership to an existing member. Requires OWNER.
    pub async fn create(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        to_user_id: &str,
    ) -> ServiceResult<OwnershipTransfer> {
        if user_id == to_user_id {
            return Err(ServiceError::Validation(
                "Cannot transfer ownership to yourself".to_string(),
            ));
        }

        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Owner)
            .await?;
        let group_id = conversation.conversation_group_id;

        if self
            .db
            .memberships()
            .get(group_id, to_user_id)
            .await?
            .is_none()
        {
            return Err(ServiceError::Validation(
                "Transfer target must be a member of the conversation group".to_string(),
            ));
        }

        let transfer = OwnershipTransfer {
            id: Uuid::new_v4(),
            conversation_group_id: group_id,
            from_user_id: user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            created_at: Utc::now(),
        };
        self.db.transfers().create(&transfer).await?;

        tracing::info!(
            group_id = %group_id,
            from = %user_id,
            to = %to_user_id,
            "Created ownership transfer"
        );
        Ok(transfer)
    }

    /// The pending transfer for the conversation's group, if any.
    /// Requires READER.
    pub async fn get(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> ServiceResult<Option<OwnershipTransfer>> {
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;
        Ok(self
            .db
            .transfers()
            .get_by_group(conversation.conversation_group_id)
            .await?)
    }

    /// Accept a pending transfer. Only the target may accept; on success
    /// the target is OWNER, the previous owner MANAGER, and every
    /// conversation in the group carries the new owner.
    pub async fn accept(&self, user_id: &str, conversation_id: Uuid) -> ServiceResult<()> {
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;

        let transfer = self
            .db
            .transfers()
            .get_by_group(conversation.conversation_group_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if transfer.to_user_id != user_id {
            return Err(ServiceError::Forbidden);
        }

        self.db.transfers().accept(transfer.id).await?;
        tracing::info!(
            group_id = %transfer.conversation_group_id,
            new_owner = %transfer.to_user_id,
            "Ownership transfer accepted"
        );
        Ok(())
    }

    /// Withdraw a pending transfer. Either party may do so.
    pub async fn delete(&self, user_id: &str, conversation_id: Uuid) -> ServiceResult<()> {
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;

        let transfer = self
            .db
            .transfers()
            .get_by_group(conversation.conversation_group_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if transfer.from_user_id != user_id && transfer.to_user_id != user_id {
            return Err(ServiceError::Forbidden);
        }

        self.db.transfers().delete(transfer.id).await?;
        Ok(())
    }
}
