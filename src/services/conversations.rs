use std::{collections::HashMap, sync::Arc};

use uuid::Uuid;
use validator::Validate;

use super::{
    access::AccessService,
    error::{ServiceError, ServiceResult},
};
use crate::{
    ancestry,
    crypto::ContentCrypto,
    db::{ConversationUpdate, Cursor, DbPool, NewConversation},
    models::{
        AccessLevel, Conversation, ConversationDetail, CreateConversation, ListMode,
        UpdateConversation,
    },
};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

/// One page of conversations with an opaque resume cursor.
#[derive(Debug)]
pub struct ConversationPage {
    pub items: Vec<ConversationDetail>,
    pub next_cursor: Option<String>,
}

/// Conversation CRUD, fork creation, and the listing modes.
#[derive(Clone)]
pub struct ConversationService {
    db: Arc<DbPool>,
    crypto: Arc<ContentCrypto>,
    access: AccessService,
}

impl ConversationService {
    pub fn new(db: Arc<DbPool>, crypto: Arc<ContentCrypto>, access: AccessService) -> Self {
        Self { db, crypto, access }
    }

    pub(super) fn decrypt_title(&self, title: &Option<Vec<u8>>) -> ServiceResult<Option<String>> {
        title
            .as_ref()
            .map(|ciphertext| {
                let plaintext = self.crypto.decrypt(ciphertext)?;
                String::from_utf8(plaintext)
                    .map_err(|_| ServiceError::Internal("Title is not valid UTF-8".to_string()))
            })
            .transpose()
    }

    pub(super) fn to_detail(
        &self,
        conversation: Conversation,
        access_level: AccessLevel,
    ) -> ServiceResult<ConversationDetail> {
        let title = self.decrypt_title(&conversation.title)?;
        Ok(ConversationDetail {
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
            access_level,
        })
    }

    /// Create a conversation. With fork metadata the caller needs READER
    /// on the parent's group and the new conversation joins that group;
    /// otherwise a fresh group is created with the caller as OWNER.
    pub async fn create(
        &self,
        user_id: &str,
        input: CreateConversation,
    ) -> ServiceResult<ConversationDetail> {
        input
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let id = input.id.unwrap_or_else(Uuid::new_v4);
        if self.db.conversations().get(id, true).await?.is_some() {
            return Err(ServiceError::Conflict(
                "Conversation id already exists".to_string(),
            ));
        }

        let title = input
            .title
            .as_deref()
            .map(|t| self.crypto.encrypt(t.as_bytes()))
            .transpose()?;

        match input.forked_at_conversation_id {
            Some(parent_id) => {
                let (parent, level) = self
                    .access
                    .resolve_conversation(parent_id, user_id, AccessLevel::Reader)
                    .await?;

                let forked_at_entry_id = match input.forked_at_entry_id {
                    Some(requested) => {
                        self.rewrite_fork_point(&parent, requested).await?
                    }
                    None => None,
                };

                let conversation = self
                    .db
                    .conversations()
                    .create_fork(NewConversation {
                        id,
                        owner_user_id: user_id.to_string(),
                        title,
                        metadata: input.metadata,
                        conversation_group_id: parent.conversation_group_id,
                        forked_at_conversation_id: Some(parent.id),
                        forked_at_entry_id,
                    })
                    .await?;

                tracing::debug!(
                    conversation_id = %conversation.id,
                    parent_id = %parent.id,
                    "Created fork"
                );
                self.to_detail(conversation, level)
            }
            None => {
                if input.forked_at_entry_id.is_some() {
                    return Err(ServiceError::Validation(
                        "forked_at_entry_id requires forked_at_conversation_id".to_string(),
                    ));
                }

                let conversation = self
                    .db
                    .conversations()
                    .create_root(NewConversation {
                        id,
                        owner_user_id: user_id.to_string(),
                        title,
                        metadata: input.metadata,
                        conversation_group_id: Uuid::new_v4(),
                        forked_at_conversation_id: None,
                        forked_at_entry_id: None,
                    })
                    .await?;

                tracing::debug!(conversation_id = %conversation.id, "Created conversation");
                self.to_detail(conversation, AccessLevel::Owner)
            }
        }
    }

    /// Rewrite the requested fork entry to its immediate HISTORY
    /// predecessor, after checking the entry actually lies on the parent's
    /// ancestry path.
    async fn rewrite_fork_point(
        &self,
        parent: &Conversation,
        requested_entry_id: Uuid,
    ) -> ServiceResult<Option<Uuid>> {
        let entry = self
            .db
            .entries()
            .get(requested_entry_id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        if entry.conversation_group_id != parent.conversation_group_id {
            return Err(ServiceError::Validation(
                "Fork entry does not belong to the parent conversation's group".to_string(),
            ));
        }

        let group_conversations = self
            .db
            .conversations()
            .list_group(parent.conversation_group_id, false)
            .await?;
        let by_id: HashMap<Uuid, Conversation> =
            group_conversations.into_iter().map(|c| (c.id, c)).collect();
        let stack = ancestry::build_ancestry(&by_id, parent.id)?;
        if !stack
            .iter()
            .any(|step| step.conversation_id == entry.conversation_id)
        {
            return Err(ServiceError::Validation(
                "Fork entry is not on the parent conversation's ancestry path".to_string(),
            ));
        }

        Ok(self
            .db
            .entries()
            .history_predecessor(entry.conversation_id, requested_entry_id)
            .await?)
    }

    /// Get a conversation. Requires READER.
    pub async fn get(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> ServiceResult<ConversationDetail> {
        let (conversation, level) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;
        self.to_detail(conversation, level)
    }

    /// Update title and/or metadata. Requires WRITER.
    pub async fn update(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        input: UpdateConversation,
    ) -> ServiceResult<ConversationDetail> {
        input
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let (_, level) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Writer)
            .await?;

        let title = input
            .title
            .as_deref()
            .map(|t| self.crypto.encrypt(t.as_bytes()))
            .transpose()?;

        let conversation = self
            .db
            .conversations()
            .update(
                conversation_id,
                ConversationUpdate {
                    title,
                    metadata: input.metadata,
                },
            )
            .await?;
        self.to_detail(conversation, level)
    }

    /// Soft-delete the conversation's entire group. Requires MANAGER or
    /// OWNER. Memberships and pending transfers are removed immediately;
    /// entries stay until the retention worker evicts the group.
    pub async fn delete(&self, user_id: &str, conversation_id: Uuid) -> ServiceResult<()> {
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Manager)
            .await?;

        self.db
            .conversations()
            .soft_delete_group(conversation.conversation_group_id, chrono::Utc::now())
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            group_id = %conversation.conversation_group_id,
            "Soft-deleted conversation group"
        );
        Ok(())
    }

    /// List conversations across the caller's groups.
    pub async fn list(
        &self,
        user_id: &str,
        mode: ListMode,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> ServiceResult<ConversationPage> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let cursor = cursor
            .map(Cursor::decode)
            .transpose()
            .map_err(|e| ServiceError::Validation(format!("Invalid cursor: {}", e)))?;

        let group_ids = self.db.memberships().group_ids_for_user(user_id).await?;
        let result = self
            .db
            .conversations()
            .list_in_groups(&group_ids, mode, limit, cursor)
            .await?;

        // The caller's level varies per group; resolve each group once.
        let mut levels: HashMap<Uuid, AccessLevel> = HashMap::new();
        let mut items = Vec::with_capacity(result.items.len());
        for conversation in result.items {
            let group_id = conversation.conversation_group_id;
            let level = match levels.get(&group_id) {
                Some(level) => *level,
                None => {
                    let level = self
                        .db
                        .memberships()
                        .get(group_id, user_id)
                        .await?
                        .map(|m| m.access_level)
                        .unwrap_or(AccessLevel::Reader);
                    levels.insert(group_id, level);
                    level
                }
            };
            items.push(self.to_detail(conversation, level)?);
        }

        Ok(ConversationPage {
            items,
            next_cursor: result.next_cursor.map(|c| c.encode()),
        })
    }

    /// Every conversation in the target's group with its fork metadata.
    /// Requires READER.
    pub async fn list_forks(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> ServiceResult<Vec<ConversationDetail>> {
        let (conversation, level) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;

        let conversations = self
            .db
            .conversations()
            .list_group(conversation.conversation_group_id, false)
            .await?;
        conversations
            .into_iter()
            .map(|c| self.to_detail(c, level))
            .collect()
    }
}
