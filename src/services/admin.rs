use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use crate::{
    crypto::ContentCrypto,
    db::{AdminConversationListParams, Cursor, DbPool},
    models::EntryView,
};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

/// Admin view of a conversation. Unlike the member-facing detail there is
/// no access level: admin reads bypass memberships entirely.
#[derive(Debug, Clone, Serialize)]
pub struct AdminConversationView {
    pub id: Uuid,
    pub owner_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: HashMap<String, String>,
    pub conversation_group_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_conversation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct AdminConversationPage {
    pub items: Vec<AdminConversationView>,
    pub next_cursor: Option<String>,
}

/// Unrestricted variants of list/get/search/delete/restore. The transport
/// layer decides who counts as an admin; this service assumes the caller
/// already does.
#[derive(Clone)]
pub struct AdminService {
    db: Arc<DbPool>,
    crypto: Arc<ContentCrypto>,
}

impl AdminService {
    pub fn new(db: Arc<DbPool>, crypto: Arc<ContentCrypto>) -> Self {
        Self { db, crypto }
    }

    fn to_view(
        &self,
        conversation: crate::models::Conversation,
    ) -> ServiceResult<AdminConversationView> {
        let title = conversation
            .title
            .as_ref()
            .map(|ciphertext| {
                let plaintext = self.crypto.decrypt(ciphertext)?;
                String::from_utf8(plaintext)
                    .map_err(|_| ServiceError::Internal("Title is not valid UTF-8".to_string()))
            })
            .transpose()?;
        Ok(AdminConversationView {
            id: conversation.id,
            owner_user_id: conversation.owner_user_id,
            title,
            metadata: conversation.metadata,
            conversation_group_id: conversation.conversation_group_id,
            forked_at_conversation_id: conversation.forked_at_conversation_id,
            forked_at_entry_id: conversation.forked_at_entry_id,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            deleted_at: conversation.deleted_at,
        })
    }

    /// List every conversation, optionally the trash only.
    pub async fn list(
        &self,
        only_deleted: bool,
        include_deleted: bool,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> ServiceResult<AdminConversationPage> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let cursor = cursor
            .map(Cursor::decode)
            .transpose()
            .map_err(|e| ServiceError::Validation(format!("Invalid cursor: {}", e)))?;

        let result = self
            .db
            .conversations()
            .admin_list(AdminConversationListParams {
                limit,
                cursor,
                only_deleted,
                include_deleted,
            })
            .await?;

        let items = result
            .items
            .into_iter()
            .map(|c| self.to_view(c))
            .collect::<ServiceResult<Vec<_>>>()?;
        Ok(AdminConversationPage {
            items,
            next_cursor: result.next_cursor.map(|c| c.encode()),
        })
    }

    /// Get a conversation regardless of membership or deletion state.
    pub async fn get(&self, conversation_id: Uuid) -> ServiceResult<AdminConversationView> {
        let conversation = self
            .db
            .conversations()
            .get(conversation_id, true)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.to_view(conversation)
    }

    /// Soft-delete a conversation's group without a membership check.
    pub async fn delete(&self, conversation_id: Uuid) -> ServiceResult<()> {
        let conversation = self
            .db
            .conversations()
            .get(conversation_id, false)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.db
            .conversations()
            .soft_delete_group(conversation.conversation_group_id, Utc::now())
            .await?;
        Ok(())
    }

    /// Restore a soft-deleted conversation and its group. Memberships
    /// were hard-deleted at delete time; only the owner's membership is
    /// re-granted, everyone else must be re-shared.
    pub async fn restore(&self, conversation_id: Uuid) -> ServiceResult<()> {
        let conversation = self
            .db
            .conversations()
            .get(conversation_id, true)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.db
            .conversations()
            .restore_group(conversation.conversation_group_id)
            .await?;

        let owner = crate::models::Membership {
            conversation_group_id: conversation.conversation_group_id,
            user_id: conversation.owner_user_id.clone(),
            access_level: crate::models::AccessLevel::Owner,
            created_at: Utc::now(),
        };
        if let Err(e) = self.db.memberships().insert(&owner).await
            && !matches!(e, crate::db::DbError::Conflict(_))
        {
            return Err(e.into());
        }

        tracing::info!(
            conversation_id = %conversation_id,
            group_id = %conversation.conversation_group_id,
            "Restored conversation group"
        );
        Ok(())
    }

    /// Substring search over indexed content across all groups.
    pub async fn search_entries(
        &self,
        query: &str,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<EntryView>> {
        if query.is_empty() {
            return Err(ServiceError::Validation(
                "Search query cannot be empty".to_string(),
            ));
        }
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let entries = self
            .db
            .entries()
            .search_indexed_content(query, None, limit)
            .await?;

        entries
            .iter()
            .map(|entry| {
                let plaintext = self.crypto.decrypt(&entry.content)?;
                let content: Vec<serde_json::Value> = serde_json::from_slice(&plaintext)
                    .map_err(|e| {
                        ServiceError::Internal(format!("Stored content is not JSON: {}", e))
                    })?;
                Ok(EntryView {
                    id: entry.id,
                    conversation_id: entry.conversation_id,
                    conversation_group_id: entry.conversation_group_id,
                    user_id: entry.user_id.clone(),
                    client_id: entry.client_id.clone(),
                    channel: entry.channel,
                    epoch: entry.epoch,
                    content_type: entry.content_type.clone(),
                    content,
                    indexed_at: entry.indexed_at,
                    created_at: entry.created_at,
                })
            })
            .collect()
    }
}
