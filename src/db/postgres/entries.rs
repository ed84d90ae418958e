use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{EntryRepo, SupersededEpoch},
    },
    models::{Channel, Entry},
};

const ENTRY_COLUMNS: &str = "id, conversation_id, conversation_group_id, user_id, client_id, \
     channel, epoch, content_type, content, indexed_content, indexed_at, created_at";

pub struct PostgresEntryRepo {
    pool: PgPool,
}

impl PostgresEntryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &PgRow) -> DbResult<Entry> {
        let channel: String = row.get("channel");
        Ok(Entry {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            conversation_group_id: row.get("conversation_group_id"),
            user_id: row.get("user_id"),
            client_id: row.get("client_id"),
            channel: channel.parse().map_err(DbError::Internal)?,
            epoch: row.get("epoch"),
            content_type: row.get("content_type"),
            content: row.get("content"),
            indexed_content: row.get("indexed_content"),
            indexed_at: row.get("indexed_at"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl EntryRepo for PostgresEntryRepo {
    async fn insert_batch(&self, entries: &[Entry]) -> DbResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO entries (id, conversation_id, conversation_group_id, user_id,
                    client_id, channel, epoch, content_type, content, indexed_content,
                    indexed_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(entry.id)
            .bind(entry.conversation_id)
            .bind(entry.conversation_group_id)
            .bind(&entry.user_id)
            .bind(&entry.client_id)
            .bind(entry.channel.as_str())
            .bind(entry.epoch)
            .bind(&entry.content_type)
            .bind(&entry.content)
            .bind(&entry.indexed_content)
            .bind(entry.indexed_at)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Entry>> {
        let query = format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_entry(&row)).transpose()
    }

    async fn list_group_entries(
        &self,
        group_id: Uuid,
        channel: Option<Channel>,
        client_id: Option<&str>,
    ) -> DbResult<Vec<Entry>> {
        let mut query = format!(
            "SELECT {} FROM entries WHERE conversation_group_id = $1",
            ENTRY_COLUMNS
        );
        let mut bind_idx = 1;
        if channel.is_some() {
            bind_idx += 1;
            query.push_str(&format!(" AND channel = ${}", bind_idx));
        }
        if client_id.is_some() {
            bind_idx += 1;
            query.push_str(&format!(" AND client_id = ${}", bind_idx));
        }
        query.push_str(" ORDER BY created_at ASC, id ASC");

        let mut q = sqlx::query(&query).bind(group_id);
        if let Some(channel) = channel {
            q = q.bind(channel.as_str());
        }
        if let Some(client_id) = client_id {
            q = q.bind(client_id);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn history_predecessor(
        &self,
        conversation_id: Uuid,
        entry_id: Uuid,
    ) -> DbResult<Option<Uuid>> {
        let target = sqlx::query(
            "SELECT created_at, id FROM entries
             WHERE id = $1 AND conversation_id = $2 AND channel = 'history'",
        )
        .bind(entry_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;

        let created_at: DateTime<Utc> = target.get("created_at");

        let row = sqlx::query(
            "SELECT id FROM entries
             WHERE conversation_id = $1 AND channel = 'history' AND (created_at, id) < ($2, $3)
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(conversation_id)
        .bind(created_at)
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.get("id")))
    }

    async fn list_unindexed(&self, limit: i64, cursor: Option<Uuid>) -> DbResult<Vec<Entry>> {
        let query = if cursor.is_some() {
            format!(
                "SELECT {} FROM entries
                 WHERE channel = 'history' AND indexed_content IS NULL
                 AND (created_at, id) > (SELECT created_at, id FROM entries WHERE id = $1)
                 ORDER BY created_at ASC, id ASC LIMIT $2",
                ENTRY_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM entries
                 WHERE channel = 'history' AND indexed_content IS NULL
                 ORDER BY created_at ASC, id ASC LIMIT $1",
                ENTRY_COLUMNS
            )
        };

        let mut q = sqlx::query(&query);
        if let Some(cursor) = cursor {
            q = q.bind(cursor);
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<Entry>> {
        let query = format!(
            "SELECT {} FROM entries
             WHERE indexed_content IS NOT NULL AND indexed_at IS NULL
             ORDER BY created_at ASC, id ASC LIMIT $1",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn set_indexed_content(
        &self,
        entry_id: Uuid,
        group_id: Uuid,
        content: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE entries SET indexed_content = $1, indexed_at = NULL
             WHERE id = $2 AND conversation_group_id = $3 AND channel = 'history'",
        )
        .bind(content)
        .bind(entry_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_indexed_at(
        &self,
        entry_id: Uuid,
        group_id: Uuid,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE entries SET indexed_at = $1
             WHERE id = $2 AND conversation_group_id = $3",
        )
        .bind(at)
        .bind(entry_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search_indexed_content(
        &self,
        query: &str,
        group_ids: Option<&[Uuid]>,
        limit: i64,
    ) -> DbResult<Vec<Entry>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);

        let rows = match group_ids {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(ids) => {
                let sql = format!(
                    "SELECT {} FROM entries
                     WHERE indexed_content ILIKE $1
                     AND conversation_group_id = ANY($2)
                     ORDER BY created_at DESC, id DESC LIMIT $3",
                    ENTRY_COLUMNS
                );
                let ids: Vec<Uuid> = ids.to_vec();
                sqlx::query(&sql)
                    .bind(&pattern)
                    .bind(&ids)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM entries
                     WHERE indexed_content ILIKE $1
                     ORDER BY created_at DESC, id DESC LIMIT $2",
                    ENTRY_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(&pattern)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn find_superseded_epochs(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<SupersededEpoch>> {
        let rows = sqlx::query(
            r#"
            SELECT e.conversation_id, e.client_id, e.epoch
            FROM entries e
            WHERE e.channel = 'memory' AND e.client_id IS NOT NULL AND e.epoch IS NOT NULL
            GROUP BY e.conversation_id, e.client_id, e.epoch
            HAVING MAX(e.created_at) < $1
               AND e.epoch < (
                   SELECT MAX(e2.epoch) FROM entries e2
                   WHERE e2.conversation_id = e.conversation_id
                     AND e2.client_id = e.client_id
                     AND e2.channel = 'memory'
               )
            ORDER BY e.conversation_id, e.client_id, e.epoch
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SupersededEpoch {
                conversation_id: row.get("conversation_id"),
                client_id: row.get("client_id"),
                epoch: row.get("epoch"),
            })
            .collect())
    }

    async fn delete_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        epoch: i64,
    ) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "DELETE FROM entries
             WHERE conversation_id = $1 AND client_id = $2 AND epoch = $3 AND channel = 'memory'
             RETURNING id",
        )
        .bind(conversation_id)
        .bind(client_id)
        .bind(epoch)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }
}
