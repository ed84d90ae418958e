use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::common::conflict_on_unique;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::TransferRepo,
    },
    models::{AccessLevel, OwnershipTransfer},
};

pub struct PostgresTransferRepo {
    pool: PgPool,
}

impl PostgresTransferRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transfer(row: &PgRow) -> OwnershipTransfer {
        OwnershipTransfer {
            id: row.get("id"),
            conversation_group_id: row.get("conversation_group_id"),
            from_user_id: row.get("from_user_id"),
            to_user_id: row.get("to_user_id"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl TransferRepo for PostgresTransferRepo {
    async fn create(&self, transfer: &OwnershipTransfer) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO ownership_transfers (id, conversation_group_id, from_user_id, to_user_id, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(transfer.id)
        .bind(transfer.conversation_group_id)
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
             FROM ownership_transfers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Self::row_to_transfer(&row)))
    }

    async fn get_by_group(&self, group_id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            "SELECT id, conversation_group_id, from_user_id, to_user_id, created_at
             FROM ownership_transfers WHERE conversation_group_id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Self::row_to_transfer(&row)))
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM ownership_transfers WHERE id = $1")
            .bind(id)
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
             WHERE conversation_group_id = $1 AND to_user_id = $2",
        )
        .bind(group_id)
        .bind(to_user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn accept(&self, id: Uuid) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, conversation_group_id, from_user_id, to_user_id, created_at
             FROM ownership_transfers WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;
        let transfer = Self::row_to_transfer(&row);

        let promoted = sqlx::query(
            "UPDATE conversation_memberships SET access_level = $1
             WHERE conversation_group_id = $2 AND user_id = $3",
        )
        .bind(AccessLevel::Owner.as_str())
        .bind(transfer.conversation_group_id)
        .bind(&transfer.to_user_id)
        .execute(&mut *tx)
        .await?;
        if promoted.rows_affected() == 0 {
            // The target left the group after the transfer was created.
            return Err(DbError::Conflict(
                "Transfer target is no longer a member of the group".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE conversation_memberships SET access_level = $1
             WHERE conversation_group_id = $2 AND user_id = $3",
        )
        .bind(AccessLevel::Manager.as_str())
        .bind(transfer.conversation_group_id)
        .bind(&transfer.from_user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET owner_user_id = $1 WHERE conversation_group_id = $2")
            .bind(&transfer.to_user_id)
            .bind(transfer.conversation_group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM ownership_transfers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
