use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_opt_uuid, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{
            AdminConversationListParams, ConversationRepo, ConversationUpdate, Cursor, ListResult,
            NewConversation, cursor::truncate_to_millis,
        },
    },
    models::{AccessLevel, Conversation, ConversationGroup, ListMode},
};

const CONVERSATION_COLUMNS: &str = "id, owner_user_id, title, metadata, conversation_group_id, \
     forked_at_conversation_id, forked_at_entry_id, created_at, updated_at, deleted_at";

pub struct SqliteConversationRepo {
    pool: SqlitePool,
}

impl SqliteConversationRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_metadata(json_str: &str) -> DbResult<HashMap<String, String>> {
        serde_json::from_str(json_str).map_err(|e| DbError::Internal(e.to_string()))
    }

    fn row_to_conversation(row: &SqliteRow) -> DbResult<Conversation> {
        let metadata_json: String = row.get("metadata");
        Ok(Conversation {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            owner_user_id: row.get("owner_user_id"),
            title: row.get("title"),
            metadata: Self::parse_metadata(&metadata_json)?,
            conversation_group_id: parse_uuid(&row.get::<String, _>("conversation_group_id"))?,
            forked_at_conversation_id: parse_opt_uuid(row.get("forked_at_conversation_id"))?,
            forked_at_entry_id: parse_opt_uuid(row.get("forked_at_entry_id"))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    fn placeholders(n: usize) -> String {
        vec!["?"; n].join(", ")
    }

    async fn insert_conversation(
        conn: &mut sqlx::SqliteConnection,
        input: &NewConversation,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let metadata_json =
            serde_json::to_string(&input.metadata).map_err(|e| DbError::Internal(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO conversations (id, owner_user_id, title, metadata, conversation_group_id,
                forked_at_conversation_id, forked_at_entry_id, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(input.id.to_string())
        .bind(&input.owner_user_id)
        .bind(&input.title)
        .bind(&metadata_json)
        .bind(input.conversation_group_id.to_string())
        .bind(input.forked_at_conversation_id.map(|id| id.to_string()))
        .bind(input.forked_at_entry_id.map(|id| id.to_string()))
        .bind(now)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    fn built_conversation(input: NewConversation, now: DateTime<Utc>) -> Conversation {
        Conversation {
            id: input.id,
            owner_user_id: input.owner_user_id,
            title: input.title,
            metadata: input.metadata,
            conversation_group_id: input.conversation_group_id,
            forked_at_conversation_id: input.forked_at_conversation_id,
            forked_at_entry_id: input.forked_at_entry_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[async_trait]
impl ConversationRepo for SqliteConversationRepo {
    async fn create_root(&self, input: NewConversation) -> DbResult<Conversation> {
        let now = truncate_to_millis(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_groups (id, created_at, deleted_at) VALUES (?, ?, NULL)",
        )
        .bind(input.conversation_group_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Self::insert_conversation(&mut *tx, &input, now).await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_memberships (conversation_group_id, user_id, access_level, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(input.conversation_group_id.to_string())
        .bind(&input.owner_user_id)
        .bind(AccessLevel::Owner.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Self::built_conversation(input, now))
    }

    async fn create_fork(&self, input: NewConversation) -> DbResult<Conversation> {
        let now = truncate_to_millis(Utc::now());
        let mut conn = self.pool.acquire().await?;
        Self::insert_conversation(&mut *conn, &input, now).await?;
        Ok(Self::built_conversation(input, now))
    }

    async fn get(&self, id: Uuid, include_deleted: bool) -> DbResult<Option<Conversation>> {
        let query = if include_deleted {
            format!(
                "SELECT {} FROM conversations WHERE id = ?",
                CONVERSATION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM conversations WHERE id = ? AND deleted_at IS NULL",
                CONVERSATION_COLUMNS
            )
        };

        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_conversation(&row)).transpose()
    }

    async fn get_group(&self, group_id: Uuid) -> DbResult<Option<ConversationGroup>> {
        let row = sqlx::query(
            "SELECT id, created_at, deleted_at FROM conversation_groups WHERE id = ?",
        )
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ConversationGroup {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                created_at: row.get("created_at"),
                deleted_at: row.get("deleted_at"),
            })
        })
        .transpose()
    }

    async fn list_in_groups(
        &self,
        group_ids: &[Uuid],
        mode: ListMode,
        limit: i64,
        cursor: Option<Cursor>,
    ) -> DbResult<ListResult<Conversation>> {
        if group_ids.is_empty() {
            return Ok(ListResult::empty());
        }

        let fetch_limit = limit + 1;
        let in_clause = Self::placeholders(group_ids.len());

        // LATEST_FORK selects the most recently updated conversation per
        // group; paging still orders by (created_at, id) for cursor
        // stability.
        let base = match mode {
            ListMode::All => format!(
                "SELECT {cols} FROM conversations
                 WHERE conversation_group_id IN ({ids}) AND deleted_at IS NULL",
                cols = CONVERSATION_COLUMNS,
                ids = in_clause
            ),
            ListMode::Roots => format!(
                "SELECT {cols} FROM conversations
                 WHERE conversation_group_id IN ({ids}) AND deleted_at IS NULL
                 AND forked_at_conversation_id IS NULL",
                cols = CONVERSATION_COLUMNS,
                ids = in_clause
            ),
            ListMode::LatestFork => format!(
                "SELECT {cols} FROM (
                     SELECT {cols}, ROW_NUMBER() OVER (
                         PARTITION BY conversation_group_id
                         ORDER BY updated_at DESC, id DESC
                     ) AS fork_rank
                     FROM conversations
                     WHERE conversation_group_id IN ({ids}) AND deleted_at IS NULL
                 ) WHERE fork_rank = 1",
                cols = CONVERSATION_COLUMNS,
                ids = in_clause
            ),
        };

        let query = if cursor.is_some() {
            format!(
                "{} AND (created_at, id) > (?, ?) ORDER BY created_at ASC, id ASC LIMIT ?",
                base
            )
        } else {
            format!("{} ORDER BY created_at ASC, id ASC LIMIT ?", base)
        };

        let mut q = sqlx::query(&query);
        for group_id in group_ids {
            q = q.bind(group_id.to_string());
        }
        if let Some(cursor) = &cursor {
            q = q.bind(cursor.created_at).bind(cursor.id.to_string());
        }
        q = q.bind(fetch_limit);

        let rows = q.fetch_all(&self.pool).await?;
        let has_more = rows.len() as i64 > limit;
        let items: Vec<Conversation> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_conversation)
            .collect::<DbResult<Vec<_>>>()?;

        let next_cursor = if has_more {
            items.last().map(|c| Cursor::new(c.created_at, c.id))
        } else {
            None
        };
        Ok(ListResult::new(items, has_more, next_cursor))
    }

    async fn list_group(
        &self,
        group_id: Uuid,
        include_deleted: bool,
    ) -> DbResult<Vec<Conversation>> {
        let deleted_filter = if include_deleted {
            ""
        } else {
            "AND deleted_at IS NULL"
        };
        let query = format!(
            "SELECT {} FROM conversations
             WHERE conversation_group_id = ? {}
             ORDER BY created_at ASC, id ASC",
            CONVERSATION_COLUMNS, deleted_filter
        );

        let rows = sqlx::query(&query)
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn admin_list(
        &self,
        params: AdminConversationListParams,
    ) -> DbResult<ListResult<Conversation>> {
        let fetch_limit = params.limit + 1;

        let deleted_filter = if params.only_deleted {
            "deleted_at IS NOT NULL"
        } else if params.include_deleted {
            "1 = 1"
        } else {
            "deleted_at IS NULL"
        };

        let query = if params.cursor.is_some() {
            format!(
                "SELECT {} FROM conversations WHERE {} AND (created_at, id) > (?, ?)
                 ORDER BY created_at ASC, id ASC LIMIT ?",
                CONVERSATION_COLUMNS, deleted_filter
            )
        } else {
            format!(
                "SELECT {} FROM conversations WHERE {}
                 ORDER BY created_at ASC, id ASC LIMIT ?",
                CONVERSATION_COLUMNS, deleted_filter
            )
        };

        let mut q = sqlx::query(&query);
        if let Some(cursor) = &params.cursor {
            q = q.bind(cursor.created_at).bind(cursor.id.to_string());
        }
        q = q.bind(fetch_limit);

        let rows = q.fetch_all(&self.pool).await?;
        let has_more = rows.len() as i64 > params.limit;
        let items: Vec<Conversation> = rows
            .iter()
            .take(params.limit as usize)
            .map(Self::row_to_conversation)
            .collect::<DbResult<Vec<_>>>()?;

        let next_cursor = if has_more {
            items.last().map(|c| Cursor::new(c.created_at, c.id))
        } else {
            None
        };
        Ok(ListResult::new(items, has_more, next_cursor))
    }

    async fn update(&self, id: Uuid, update: ConversationUpdate) -> DbResult<Conversation> {
        let now = truncate_to_millis(Utc::now());

        // IMMEDIATE transaction takes the write lock before the read so a
        // concurrent update cannot interleave between read and write.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            let query = format!(
                "SELECT {} FROM conversations WHERE id = ? AND deleted_at IS NULL",
                CONVERSATION_COLUMNS
            );
            let row = sqlx::query(&query)
                .bind(id.to_string())
                .fetch_optional(&mut *conn)
                .await?
                .ok_or(DbError::NotFound)?;

            let mut conversation = Self::row_to_conversation(&row)?;
            if let Some(title) = update.title {
                conversation.title = Some(title);
            }
            if let Some(metadata) = update.metadata {
                conversation.metadata = metadata;
            }
            conversation.updated_at = now;

            let metadata_json = serde_json::to_string(&conversation.metadata)
                .map_err(|e| DbError::Internal(e.to_string()))?;
            sqlx::query(
                "UPDATE conversations SET title = ?, metadata = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&conversation.title)
            .bind(&metadata_json)
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

            Ok::<_, DbError>(conversation)
        }
        .await;

        match result {
            Ok(conversation) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(conversation)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn set_title_if_absent(&self, id: Uuid, title: &[u8]) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ? WHERE id = ? AND title IS NULL AND deleted_at IS NULL",
        )
        .bind(title)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete_group(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation_groups SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(group_id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query(
            "UPDATE conversations SET deleted_at = ? WHERE conversation_group_id = ? AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(group_id.to_string())
        .execute(&mut *tx)
        .await?;

        // Memberships and pending transfers go immediately: revoked members
        // must not be able to read during the retention window.
        sqlx::query("DELETE FROM conversation_memberships WHERE conversation_group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ownership_transfers WHERE conversation_group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn restore_group(&self, group_id: Uuid) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT deleted_at FROM conversation_groups WHERE id = ?")
            .bind(group_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;
        let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
        if deleted_at.is_none() {
            return Err(DbError::Conflict(
                "Conversation group is not deleted".to_string(),
            ));
        }

        sqlx::query("UPDATE conversation_groups SET deleted_at = NULL WHERE id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE conversations SET deleted_at = NULL WHERE conversation_group_id = ?",
        )
        .bind(group_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_evictable_group_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM conversation_groups
             WHERE deleted_at IS NOT NULL AND deleted_at < ?
             ORDER BY deleted_at ASC
             LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect()
    }

    async fn hard_delete_groups(&self, group_ids: &[Uuid]) -> DbResult<u64> {
        if group_ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0u64;
        let mut tx = self.pool.begin().await?;

        // Dependency order: attachments and entries first, the group last.
        for group_id in group_ids {
            let id = group_id.to_string();

            sqlx::query(
                "DELETE FROM attachments WHERE conversation_group_id = ?
                 OR entry_id IN (SELECT id FROM entries WHERE conversation_group_id = ?)",
            )
            .bind(&id)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM entries WHERE conversation_group_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM conversations WHERE conversation_group_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM conversation_memberships WHERE conversation_group_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM ownership_transfers WHERE conversation_group_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM conversation_groups WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }
}
