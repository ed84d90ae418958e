use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_opt_uuid, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::AttachmentRepo,
    },
    models::Attachment,
};

const ATTACHMENT_COLUMNS: &str = "id, entry_id, conversation_group_id, user_id, file_name, \
     media_type, size_bytes, expires_at, created_at, deleted_at";

pub struct SqliteAttachmentRepo {
    pool: SqlitePool,
}

impl SqliteAttachmentRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_attachment(row: &SqliteRow) -> DbResult<Attachment> {
        Ok(Attachment {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            entry_id: parse_opt_uuid(row.get("entry_id"))?,
            conversation_group_id: parse_opt_uuid(row.get("conversation_group_id"))?,
            user_id: row.get("user_id"),
            file_name: row.get("file_name"),
            media_type: row.get("media_type"),
            size_bytes: row.get("size_bytes"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

#[async_trait]
impl AttachmentRepo for SqliteAttachmentRepo {
    async fn create(&self, attachment: &Attachment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO attachments (id, entry_id, conversation_group_id, user_id, file_name,
                media_type, size_bytes, expires_at, created_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(attachment.id.to_string())
        .bind(attachment.entry_id.map(|id| id.to_string()))
        .bind(attachment.conversation_group_id.map(|id| id.to_string()))
        .bind(&attachment.user_id)
        .bind(&attachment.file_name)
        .bind(&attachment.media_type)
        .bind(attachment.size_bytes)
        .bind(attachment.expires_at)
        .bind(attachment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Attachment>> {
        let query = format!(
            "SELECT {} FROM attachments WHERE id = ? AND deleted_at IS NULL",
            ATTACHMENT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_attachment(&row)).transpose()
    }

    async fn list_by_entry(&self, entry_id: Uuid) -> DbResult<Vec<Attachment>> {
        let query = format!(
            "SELECT {} FROM attachments
             WHERE entry_id = ? AND deleted_at IS NULL
             ORDER BY created_at ASC, id ASC",
            ATTACHMENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(entry_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }

    async fn link_to_entry(&self, id: Uuid, entry_id: Uuid, group_id: Uuid) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE attachments
             SET entry_id = ?, conversation_group_id = ?, expires_at = NULL
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(entry_id.to_string())
        .bind(group_id.to_string())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE attachments SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(at)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_expired_unlinked(&self, now: DateTime<Utc>, limit: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM attachments WHERE id IN (
                 SELECT id FROM attachments
                 WHERE entry_id IS NULL AND expires_at IS NOT NULL AND expires_at < ?
                 LIMIT ?
             )",
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
