use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{TaskRepo, cursor::truncate_to_millis},
    },
    models::{CreateTask, Task},
};

const TASK_COLUMNS: &str =
    "id, task_name, task_type, body, retry_at, processing_at, retry_count, last_error, created_at";

pub struct PostgresTaskRepo {
    pool: PgPool,
}

impl PostgresTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> Task {
        Task {
            id: row.get("id"),
            task_name: row.get("task_name"),
            task_type: row.get("task_type"),
            body: row.get("body"),
            retry_at: row.get("retry_at"),
            processing_at: row.get("processing_at"),
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl TaskRepo for PostgresTaskRepo {
    async fn create(&self, input: CreateTask) -> DbResult<Task> {
        let id = Uuid::new_v4();
        let now = truncate_to_millis(Utc::now());

        // Singletons coalesce: a second create with the same name leaves
        // the outstanding row in place and returns it.
        let query = format!(
            r#"
            INSERT INTO tasks (id, task_name, task_type, body, retry_at, processing_at,
                retry_count, last_error, created_at)
            VALUES ($1, $2, $3, $4, $5, NULL, 0, NULL, $6)
            ON CONFLICT (task_name) DO NOTHING
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&input.task_name)
            .bind(&input.task_type)
            .bind(&input.body)
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(Self::row_to_task(&row));
        }

        // Insert was a no-op: return the existing singleton.
        let name = input
            .task_name
            .ok_or_else(|| DbError::Internal("Task insert affected no rows".to_string()))?;
        let query = format!("SELECT {} FROM tasks WHERE task_name = $1", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::Internal(format!("Singleton task {} vanished", name)))?;
        Ok(Self::row_to_task(&row))
    }

    async fn claim_ready(&self, limit: i64, claim_ttl: chrono::Duration) -> DbResult<Vec<Task>> {
        let now = truncate_to_millis(Utc::now());
        let stale_before = now - claim_ttl;
        let reclaim_at = now + claim_ttl;

        let query = format!(
            r#"
            UPDATE tasks SET processing_at = $1, retry_at = $2
            WHERE id IN (
                SELECT id FROM tasks
                WHERE retry_at <= $1 AND (processing_at IS NULL OR processing_at < $3)
                ORDER BY retry_at ASC, created_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(reclaim_at)
            .bind(stale_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_task).collect())
    }

    async fn fail(&self, id: Uuid, error: &str, delay: chrono::Duration) -> DbResult<()> {
        let retry_at = truncate_to_millis(Utc::now() + delay);
        let result = sqlx::query(
            "UPDATE tasks SET retry_count = retry_count + 1, retry_at = $1,
             processing_at = NULL, last_error = $2 WHERE id = $3",
        )
        .bind(retry_at)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Task>> {
        let query = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Self::row_to_task(&row)))
    }

    async fn get_by_name(&self, task_name: &str) -> DbResult<Option<Task>> {
        let query = format!("SELECT {} FROM tasks WHERE task_name = $1", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(task_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Self::row_to_task(&row)))
    }
}
