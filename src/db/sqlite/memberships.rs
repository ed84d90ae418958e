use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{conflict_on_unique, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::MembershipRepo,
    },
    models::{AccessLevel, Membership},
};

pub struct SqliteMembershipRepo {
    pool: SqlitePool,
}

impl SqliteMembershipRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_membership(row: &SqliteRow) -> DbResult<Membership> {
        let level: String = row.get("access_level");
        Ok(Membership {
            conversation_group_id: parse_uuid(&row.get::<String, _>("conversation_group_id"))?,
            user_id: row.get("user_id"),
            access_level: level.parse().map_err(DbError::Internal)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl MembershipRepo for SqliteMembershipRepo {
    async fn get(&self, group_id: Uuid, user_id: &str) -> DbResult<Option<Membership>> {
        let row = sqlx::query(
            "SELECT conversation_group_id, user_id, access_level, created_at
             FROM conversation_memberships
             WHERE conversation_group_id = ? AND user_id = ?",
        )
        .bind(group_id.to_string())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Self::row_to_membership(&row)).transpose()
    }

    async fn list_for_group(&self, group_id: Uuid) -> DbResult<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT conversation_group_id, user_id, access_level, created_at
             FROM conversation_memberships
             WHERE conversation_group_id = ?
             ORDER BY created_at ASC, user_id ASC",
        )
        .bind(group_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_membership).collect()
    }

    async fn group_ids_for_user(&self, user_id: &str) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT conversation_group_id FROM conversation_memberships WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_uuid(&row.get::<String, _>("conversation_group_id")))
            .collect()
    }

    async fn insert(&self, membership: &Membership) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO conversation_memberships (conversation_group_id, user_id, access_level, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(membership.conversation_group_id.to_string())
        .bind(&membership.user_id)
        .bind(membership.access_level.as_str())
        .bind(membership.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "User is already a member of this conversation group"))?;
        Ok(())
    }

    async fn update_level(
        &self,
        group_id: Uuid,
        user_id: &str,
        access_level: AccessLevel,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE conversation_memberships SET access_level = ?
             WHERE conversation_group_id = ? AND user_id = ?",
        )
        .bind(access_level.as_str())
        .bind(group_id.to_string())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, group_id: Uuid, user_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "DELETE FROM conversation_memberships
             WHERE conversation_group_id = ? AND user_id = ?",
        )
        .bind(group_id.to_string())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
