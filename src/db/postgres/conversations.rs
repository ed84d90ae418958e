use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

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

pub struct PostgresConversationRepo {
    pool: PgPool,
}

impl PostgresConversationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_conversation(row: &PgRow) -> DbResult<Conversation> {
        let metadata_json: serde_json::Value = row.get("metadata");
        let metadata: HashMap<String, String> =
            serde_json::from_value(metadata_json).map_err(|e| DbError::Internal(e.to_string()))?;
        Ok(Conversation {
            id: row.get("id"),
            owner_user_id: row.get("owner_user_id"),
            title: row.get("title"),
            metadata,
            conversation_group_id: row.get("conversation_group_id"),
            forked_at_conversation_id: row.get("forked_at_conversation_id"),
            forked_at_entry_id: row.get("forked_at_entry_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    async fn insert_conversation(
        conn: &mut sqlx::PgConnection,
        input: &NewConversation,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let metadata_json =
            serde_json::to_value(&input.metadata).map_err(|e| DbError::Internal(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO conversations (id, owner_user_id, title, metadata, conversation_group_id,
                forked_at_conversation_id, forked_at_entry_id, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)
            "#,
        )
        .bind(input.id)
        .bind(&input.owner_user_id)
        .bind(&input.title)
        .bind(&metadata_json)
        .bind(input.conversation_group_id)
        .bind(input.forked_at_conversation_id)
        .bind(input.forked_at_entry_id)
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
impl ConversationRepo for PostgresConversationRepo {
    async fn create_root(&self, input: NewConversation) -> DbResult<Conversation> {
        let now = truncate_to_millis(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_groups (id, created_at, deleted_at) VALUES ($1, $2, NULL)",
        )
        .bind(input.conversation_group_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        Self::insert_conversation(&mut *tx, &input, now).await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_memberships (conversation_group_id, user_id, access_level, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(input.conversation_group_id)
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
                "SELECT {} FROM conversations WHERE id = $1",
                CONVERSATION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM conversations WHERE id = $1 AND deleted_at IS NULL",
                CONVERSATION_COLUMNS
            )
        };

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_conversation(&row)).transpose()
    }

    async fn get_group(&self, group_id: Uuid) -> DbResult<Option<ConversationGroup>> {
        let row = sqlx::query(
            "SELECT id, created_at, deleted_at FROM conversation_groups WHERE id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ConversationGroup {
            id: row.get("id"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        }))
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

        let base = match mode {
            ListMode::All => format!(
                "SELECT {cols} FROM conversations
                 WHERE conversation_group_id = ANY($1) AND deleted_at IS NULL",
                cols = CONVERSATION_COLUMNS
            ),
            ListMode::Roots => format!(
                "SELECT {cols} FROM conversations
                 WHERE conversation_group_id = ANY($1) AND deleted_at IS NULL
                 AND forked_at_conversation_id IS NULL",
                cols = CONVERSATION_COLUMNS
            ),
            ListMode::LatestFork => format!(
                "SELECT {cols} FROM (
                     SELECT {cols}, ROW_NUMBER() OVER (
                         PARTITION BY conversation_group_id
                         ORDER BY updated_at DESC, id DESC
                     ) AS fork_rank
                     FROM conversations
                     WHERE conversation_group_id = ANY($1) AND deleted_at IS NULL
                 ) ranked WHERE fork_rank = 1",
                cols = CONVERSATION_COLUMNS
            ),
        };

        let query = if cursor.is_some() {
            format!(
                "{} AND (created_at, id) > ($2, $3) ORDER BY created_at ASC, id ASC LIMIT $4",
                base
            )
        } else {
            format!("{} ORDER BY created_at ASC, id ASC LIMIT $2", base)
        };

        let ids: Vec<Uuid> = group_ids.to_vec();
        let mut q = sqlx::query(&query).bind(&ids);
        if let Some(cursor) = &cursor {
            q = q.bind(cursor.created_at).bind(cursor.id);
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
             WHERE conversation_group_id = $1 {}
             ORDER BY created_at ASC, id ASC",
            CONVERSATION_COLUMNS, deleted_filter
        );

        let rows = sqlx::query(&query)
            .bind(group_id)
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
            "TRUE"
        } else {
            "deleted_at IS NULL"
        };

        let query = if params.cursor.is_some() {
            format!(
                "SELECT {} FROM conversations WHERE {} AND (created_at, id) > ($1, $2)
                 ORDER BY created_at ASC, id ASC LIMIT $3",
                CONVERSATION_COLUMNS, deleted_filter
            )
        } else {
            format!(
                "SELECT {} FROM conversations WHERE {}
                 ORDER BY created_at ASC, id ASC LIMIT $1",
                CONVERSATION_COLUMNS, deleted_filter
            )
        };

        let mut q = sqlx::query(&query);
        if let Some(cursor) = &params.cursor {
            q = q.bind(cursor.created_at).bind(cursor.id);
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
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "SELECT {} FROM conversations WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
            CONVERSATION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
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

        let metadata_json = serde_json::to_value(&conversation.metadata)
            .map_err(|e| DbError::Internal(e.to_string()))?;
        sqlx::query(
            "UPDATE conversations SET title = $1, metadata = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(&conversation.title)
        .bind(&metadata_json)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(conversation)
    }

    async fn set_title_if_absent(&self, id: Uuid, title: &[u8]) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET title = $1
             WHERE id = $2 AND title IS NULL AND deleted_at IS NULL",
        )
        .bind(title)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete_group(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE conversation_groups SET deleted_at = $1 WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query(
            "UPDATE conversations SET deleted_at = $1
             WHERE conversation_group_id = $2 AND deleted_at IS NULL",
        )
        .bind(at)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        // Memberships and pending transfers go immediately: revoked members
        // must not be able to read during the retention window.
        sqlx::query("DELETE FROM conversation_memberships WHERE conversation_group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ownership_transfers WHERE conversation_group_id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn restore_group(&self, group_id: Uuid) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT deleted_at FROM conversation_groups WHERE id = $1 FOR UPDATE",
        )
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;
        let deleted_at: Option<DateTime<Utc>> = row.get("deleted_at");
        if deleted_at.is_none() {
            return Err(DbError::Conflict(
                "Conversation group is not deleted".to_string(),
            ));
        }

        sqlx::query("UPDATE conversation_groups SET deleted_at = NULL WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE conversations SET deleted_at = NULL WHERE conversation_group_id = $1",
        )
        .bind(group_id)
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
             WHERE deleted_at IS NOT NULL AND deleted_at < $1
             ORDER BY deleted_at ASC
             LIMIT $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn hard_delete_groups(&self, group_ids: &[Uuid]) -> DbResult<u64> {
        if group_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = group_ids.to_vec();
        let mut tx = self.pool.begin().await?;

        // Dependency order: attachments and entries first, the group last.
        sqlx::query(
            "DELETE FROM attachments WHERE conversation_group_id = ANY($1)
             OR entry_id IN (SELECT id FROM entries WHERE conversation_group_id = ANY($1))",
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM entries WHERE conversation_group_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE conversation_group_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversation_memberships WHERE conversation_group_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ownership_transfers WHERE conversation_group_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM conversation_groups WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
