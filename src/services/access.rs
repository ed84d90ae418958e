use std::sync::Arc;

use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use crate::{
    db::DbPool,
    models::{AccessLevel, Conversation},
};

/// Group-scoped membership gate. Every operation that touches a
/// conversation resolves through here first.
#[derive(Clone)]
pub struct AccessService {
    db: Arc<DbPool>,
}

impl AccessService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Check that `user_id` holds at least `min_level` on the group.
    /// Returns the member's concrete level. A missing membership reads the
    /// same as an insufficient one.
    pub async fn require_access(
        &self,
        user_id: &str,
        group_id: Uuid,
        min_level: AccessLevel,
    ) -> ServiceResult<AccessLevel> {
        let membership = self
            .db
            .memberships()
            .get(group_id, user_id)
            .await?
            .ok_or(ServiceError::Forbidden)?;

        if membership.access_level < min_level {
            return Err(ServiceError::Forbidden);
        }
        Ok(membership.access_level)
    }

    /// Load a non-deleted conversation and gate on its group.
    pub async fn resolve_conversation(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        min_level: AccessLevel,
    ) -> ServiceResult<(Conversation, AccessLevel)> {
        let conversation = self
            .db
            .conversations()
            .get(conversation_id, false)
            .await?
            .ok_or(ServiceError::NotFound)?;

        let level = self
            .require_access(user_id, conversation.conversation_group_id, min_level)
            .await?;
        Ok((conversation, level))
    }
}
