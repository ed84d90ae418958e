use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{conflict_on_unique, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TransferRepo,
    },
    models::{AccessLevel, OwnershipTransfer},
};

pub struct SqliteTransferRepo {
    pool: SqlitePool,
}

impl SqliteTransferRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_transfer(row: &SqliteRow) -> DbResult<OwnershipTransfer> {
        Ok(OwnershipTransfer {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            conversation_group_id: parse_uuid(&row.get::<String, _>("conversation_group_id"))?,
            from_user_id: row.get("from_user_id"),
            to_user_id: row.get("to_user_id"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TransferRepo for SqliteTransferRepo {
    async fn create(&self, transfer: &OwnershipTransfer) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO ownership_transfers (id, conversation_group_id, from_user_id, to_user_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(transfer.id.to_string())
        .bind(transfer.conversation_group_id.to_string())
        .bind(&transfer.from_user_id)
        .bind(&transfer.to_user_id)
        .bind(transfer.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, "A pending transfer already exists for this conversation group")
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            "SELECT id, conversation_group_id, from_user_id, to_user_id, created_at
             FROM ownership_transfers WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Self::row_to_transfer(&row)).transpose()
    }

    async fn get_by_group(&self, group_id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            "SELECT id, conversation_group_id, from_user_id, to_user_id, created_at
             FROM ownership_transfers WHERE conversation_group_id = ?",
        )
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Self::row_to_transfer(&row)).transpose()
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM ownership_transfers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_by_group_target(&self, group_id: Uuid, to_user_id: &str) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM ownership_transfers
             WHERE conversation_group_id = ? AND to_user_id = ?",
        )
        .bind(group_id.to_string())
        .bind(to_user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn accept(&self, id: Uuid) -> DbResult<()> {
        // IMMEDIATE transaction: the accept must observe and swap the
        // memberships without a concurrent accept or share interleaving.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            let row = sqlx::query(
                "SELECT id, conversation_group_id, from_user_id, to_user_id, created_at
                 FROM ownership_transfers WHERE id = ?",
            )
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(DbError::NotFound)?;
            let transfer = Self::row_to_transfer(&row)?;
            let group_id = transfer.conversation_group_id.to_string();

            let promoted = sqlx::query(
                "UPDATE conversation_memberships SET access_level = ?
                 WHERE conversation_group_id = ? AND user_id = ?",
            )
            .bind(AccessLevel::Owner.as_str())
            .bind(&group_id)
            .bind(&transfer.to_user_id)
            .execute(&mut *conn)
            .await?;
            if promoted.rows_affected() == 0 {
                // The target left the group after the transfer was created.
                return Err(DbError::Conflict(
                    "Transfer target is no longer a member of the group".to_string(),
                ));
            }

            sqlx::query(
                "UPDATE conversation_memberships SET access_level = ?
                 WHERE conversation_group_id = ? AND user_id = ?",
            )
            .bind(AccessLevel::Manager.as_str())
            .bind(&group_id)
            .bind(&transfer.from_user_id)
            .execute(&mut *conn)
            .await?;

            sqlx::query(
                "UPDATE conversations SET owner_user_id = ? WHERE conversation_group_id = ?",
            )
            .bind(&transfer.to_user_id)
            .bind(&group_id)
            .execute(&mut *conn)
            .await?;

            sqlx::query("DELETE FROM ownership_transfers WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;

            Ok::<_, DbError>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}
