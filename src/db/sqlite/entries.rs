use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{EntryRepo, SupersededEpoch},
    },
    models::{Channel, Entry},
};

const ENTRY_COLUMNS: &str = "id, conversation_id, conversation_group_id, user_id, client_id, \
     channel, epoch, content_type, content, indexed_content, indexed_at, created_at";

pub struct SqliteEntryRepo {
    pool: SqlitePool,
}

impl SqliteEntryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> DbResult<Entry> {
        let channel: String = row.get("channel");
        Ok(Entry {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            conversation_id: parse_uuid(&row.get::<String, _>("conversation_id"))?,
            conversation_group_id: parse_uuid(&row.get::<String, _>("conversation_group_id"))?,
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
impl EntryRepo for SqliteEntryRepo {
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
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.id.to_string())
            .bind(entry.conversation_id.to_string())
            .bind(entry.conversation_group_id.to_string())
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
        let query = format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
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
            "SELECT {} FROM entries WHERE conversation_group_id = ?",
            ENTRY_COLUMNS
        );
        if channel.is_some() {
            query.push_str(" AND channel = ?");
        }
        if client_id.is_some() {
            query.push_str(" AND client_id = ?");
        }
        query.push_str(" ORDER BY created_at ASC, id ASC");

        let mut q = sqlx::query(&query).bind(group_id.to_string());
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
             WHERE id = ? AND conversation_id = ? AND channel = 'history'",
        )
        .bind(entry_id.to_string())
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;

        let created_at: DateTime<Utc> = target.get("created_at");

        let row = sqlx::query(
            "SELECT id FROM entries
             WHERE conversation_id = ? AND channel = 'history' AND (created_at, id) < (?, ?)
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
        )
        .bind(conversation_id.to_string())
        .bind(created_at)
        .bind(entry_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| parse_uuid(&row.get::<String, _>("id")))
            .transpose()
    }

    async fn list_unindexed(&self, limit: i64, cursor: Option<Uuid>) -> DbResult<Vec<Entry>> {
        let query = if cursor.is_some() {
            format!(
                "SELECT {} FROM entries
                 WHERE channel = 'history' AND indexed_content IS NULL
                 AND (created_at, id) > (SELECT created_at, id FROM entries WHERE id = ?)
                 ORDER BY created_at ASC, id ASC LIMIT ?",
                ENTRY_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM entries
                 WHERE channel = 'history' AND indexed_content IS NULL
                 ORDER BY created_at ASC, id ASC LIMIT ?",
                ENTRY_COLUMNS
            )
        };

        let mut q = sqlx::query(&query);
        if let Some(cursor) = cursor {
            q = q.bind(cursor.to_string());
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<Entry>> {
        let query = format!(
            "SELECT {} FROM entries
             WHERE indexed_content IS NOT NULL AND indexed_at IS NULL
             ORDER BY created_at ASC, id ASC LIMIT ?",
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
            "UPDATE entries SET indexed_content = ?, indexed_at = NULL
             WHERE id = ? AND conversation_group_id = ? AND channel = 'history'",
        )
        .bind(content)
        .bind(entry_id.to_string())
        .bind(group_id.to_string())
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
            "UPDATE entries SET indexed_at = ?
             WHERE id = ? AND conversation_group_id = ?",
        )
        .bind(at)
        .bind(entry_id.to_string())
        .bind(group_id.to_string())
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

        let sql = match group_ids {
            Some(ids) if ids.is_empty() => return Ok(Vec::new()),
            Some(ids) => format!(
                "SELECT {} FROM entries
                 WHERE indexed_content LIKE ? ESCAPE '\\'
                 AND conversation_group_id IN ({})
                 ORDER BY created_at DESC, id DESC LIMIT ?",
                ENTRY_COLUMNS,
                vec!["?"; ids.len()].join(", ")
            ),
            None => format!(
                "SELECT {} FROM entries
                 WHERE indexed_content LIKE ? ESCAPE '\\'
                 ORDER BY created_at DESC, id DESC LIMIT ?",
                ENTRY_COLUMNS
            ),
        };

        let mut q = sqlx::query(&sql).bind(&pattern);
        if let Some(ids) = group_ids {
            for id in ids {
                q = q.bind(id.to_string());
            }
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await?;
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
            HAVING MAX(e.created_at) < ?
               AND e.epoch < (
                   SELECT MAX(e2.epoch) FROM entries e2
                   WHERE e2.conversation_id = e.conversation_id
                     AND e2.client_id = e.client_id
                     AND e2.channel = 'memory'
               )
            ORDER BY e.conversation_id, e.client_id, e.epoch
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SupersededEpoch {
                    conversation_id: parse_uuid(&row.get::<String, _>("conversation_id"))?,
                    client_id: row.get("client_id"),
                    epoch: row.get("epoch"),
                })
            })
            .collect()
    }

    async fn delete_epoch(
        &self,
        conversation_id: Uuid,
        client_id: &str,
        epoch: i64,
    ) -> DbResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id FROM entries
             WHERE conversation_id = ? AND client_id = ? AND epoch = ? AND channel = 'memory'",
        )
        .bind(conversation_id.to_string())
        .bind(client_id)
        .bind(epoch)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect::<DbResult<Vec<_>>>()?;

        sqlx::query(
            "DELETE FROM entries
             WHERE conversation_id = ? AND client_id = ? AND epoch = ? AND channel = 'memory'",
        )
        .bind(conversation_id.to_string())
        .bind(client_id)
        .bind(epoch)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }
}
