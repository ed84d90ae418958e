use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{
    access::AccessService,
    error::{ServiceError, ServiceResult},
};
use crate::{
    db::DbPool,
    models::{AccessLevel, Attachment, CreateAttachment},
};

/// TTL for uploads that are not yet linked to an entry.
const UNLINKED_TTL_HOURS: i64 = 24;

/// Attachment records. Blob bytes live in the external store; the engine
/// tracks linkage and drives cascade deletion through eviction.
#[derive(Clone)]
pub struct AttachmentService {
    db: Arc<DbPool>,
    access: AccessService,
}

impl AttachmentService {
    pub fn new(db: Arc<DbPool>, access: AccessService) -> Self {
        Self { db, access }
    }

    /// Register an uploaded blob. Linking to an entry requires READER on
    /// the entry's group; unlinked uploads expire after a TTL.
    pub async fn create(
        &self,
        user_id: &str,
        input: CreateAttachment,
    ) -> ServiceResult<Attachment> {
        let now = Utc::now();
        let (entry_id, group_id, expires_at) = match input.entry_id {
            Some(entry_id) => {
                let group_id = self.entry_group_for_reader(user_id, entry_id).await?;
                (Some(entry_id), Some(group_id), None)
            }
            None => (None, None, Some(now + Duration::hours(UNLINKED_TTL_HOURS))),
        };

        let attachment = Attachment {
            id: Uuid::new_v4(),
            entry_id,
            conversation_group_id: group_id,
            user_id: user_id.to_string(),
            file_name: input.file_name,
            media_type: input.media_type,
            size_bytes: input.size_bytes,
            expires_at,
            created_at: now,
            deleted_at: None,
        };
        self.db.attachments().create(&attachment).await?;
        Ok(attachment)
    }

    /// Get an attachment: the uploader always may, anyone else needs
    /// READER on the linked entry's group.
    pub async fn get(&self, user_id: &str, id: Uuid) -> ServiceResult<Attachment> {
        let attachment = self
            .db
            .attachments()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.check_attachment_access(user_id, &attachment).await?;
        Ok(attachment)
    }

    /// Attach a pending upload to an entry, clearing its TTL. Only the
    /// uploader may link, and needs READER on the entry's group.
    pub async fn link(&self, user_id: &str, id: Uuid, entry_id: Uuid) -> ServiceResult<()> {
        let attachment = self
            .db
            .attachments()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        if attachment.user_id != user_id {
            return Err(ServiceError::Forbidden);
        }

        let group_id = self.entry_group_for_reader(user_id, entry_id).await?;
        self.db
            .attachments()
            .link_to_entry(id, entry_id, group_id)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: &str, id: Uuid) -> ServiceResult<()> {
        let attachment = self
            .db
            .attachments()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.check_attachment_access(user_id, &attachment).await?;
        self.db.attachments().soft_delete(id, Utc::now()).await?;
        Ok(())
    }

    /// Attachments linked to one entry. Requires READER on the entry's
    /// group.
    pub async fn list_by_entry(
        &self,
        user_id: &str,
        entry_id: Uuid,
    ) -> ServiceResult<Vec<Attachment>> {
        self.entry_group_for_reader(user_id, entry_id).await?;
        Ok(self.db.attachments().list_by_entry(entry_id).await?)
    }

    async fn check_attachment_access(
        &self,
        user_id: &str,
        attachment: &Attachment,
    ) -> ServiceResult<()> {
        if attachment.user_id == user_id {
            return Ok(());
        }
        match attachment.conversation_group_id {
            Some(group_id) => {
                self.access
                    .require_access(user_id, group_id, AccessLevel::Reader)
                    .await?;
                Ok(())
            }
            None => Err(ServiceError::Forbidden),
        }
    }

    async fn entry_group_for_reader(&self, user_id: &str, entry_id: Uuid) -> ServiceResult<Uuid> {
        let entry = self
            .db
            .entries()
            .get(entry_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.access
            .require_access(user_id, entry.conversation_group_id, AccessLevel::Reader)
            .await?;
        Ok(entry.conversation_group_id)
    }
}
