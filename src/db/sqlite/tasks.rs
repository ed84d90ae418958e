use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{TaskRepo, cursor::truncate_to_millis},
    },
    models::{CreateTask, Task},
};

const TASK_COLUMNS: &str =
    "id, task_name, task_type, body, retry_at, processing_at, retry_count, last_error, created_at";

pub struct SqliteTaskRepo {
    pool: SqlitePool,
}

impl SqliteTaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> DbResult<Task> {
        let body_json: String = row.get("body");
        Ok(Task {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            task_name: row.get("task_name"),
            task_type: row.get("task_type"),
            body: serde_json::from_str(&body_json).map_err(|e| DbError::Internal(e.to_string()))?,
            retry_at: row.get("retry_at"),
            processing_at: row.get("processing_at"),
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TaskRepo for SqliteTaskRepo {
    async fn create(&self, input: CreateTask) -> DbResult<Task> {
        let id = Uuid::new_v4();
        let now = truncate_to_millis(Utc::now());
        let body_json =
            serde_json::to_string(&input.body).map_err(|e| DbError::Internal(e.to_string()))?;

        // Singletons coalesce: a second create with the same name leaves
        // the outstanding row in place and returns it.
        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_name, task_type, body, retry_at, processing_at,
                retry_count, last_error, created_at)
            VALUES (?, ?, ?, ?, ?, NULL, 0, NULL, ?)
            ON CONFLICT (task_name) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(&input.task_name)
        .bind(&input.task_type)
        .bind(&body_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let query = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        if let Some(row) = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
        {
            return Self::row_to_task(&row);
        }

        // Insert was a no-op: return the existing singleton.
        let name = input
            .task_name
            .ok_or_else(|| DbError::Internal("Task insert affected no rows".to_string()))?;
        let query = format!("SELECT {} FROM tasks WHERE task_name = ?", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::Internal(format!("Singleton task {} vanished", name)))?;
        Self::row_to_task(&row)
    }

    async fn claim_ready(&self, limit: i64, claim_ttl: chrono::Duration) -> DbResult<Vec<Task>> {
        let now = truncate_to_millis(Utc::now());
        let stale_before = now - claim_ttl;
        let reclaim_at = now + claim_ttl;

        // IMMEDIATE transaction: select-then-update must be atomic so two
        // workers cannot claim the same rows.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = async {
            let query = format!(
                "SELECT {} FROM tasks
                 WHERE retry_at <= ? AND (processing_at IS NULL OR processing_at < ?)
                 ORDER BY retry_at ASC, created_at ASC
                 LIMIT ?",
                TASK_COLUMNS
            );
            let rows = sqlx::query(&query)
                .bind(now)
                .bind(stale_before)
                .bind(limit)
                .fetch_all(&mut *conn)
                .await?;

            let mut tasks = rows
                .iter()
                .map(Self::row_to_task)
                .collect::<DbResult<Vec<_>>>()?;

            for task in &mut tasks {
                sqlx::query("UPDATE tasks SET processing_at = ?, retry_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(reclaim_at)
                    .bind(task.id.to_string())
                    .execute(&mut *conn)
                    .await?;
                task.processing_at = Some(now);
                task.retry_at = reclaim_at;
            }

            Ok::<_, DbError>(tasks)
        }
        .await;

        match result {
            Ok(tasks) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(tasks)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn fail(&self, id: Uuid, error: &str, delay: chrono::Duration) -> DbResult<()> {
        let retry_at = truncate_to_millis(Utc::now() + delay);
        let result = sqlx::query(
            "UPDATE tasks SET retry_count = retry_count + 1, retry_at = ?,
             processing_at = NULL, last_error = ? WHERE id = ?",
        )
        .bind(retry_at)
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Task>> {
        let query = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_task(&row)).transpose()
    }

    async fn get_by_name(&self, task_name: &str) -> DbResult<Option<Task>> {
        let query = format!("SELECT {} FROM tasks WHERE task_name = ?", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(task_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_task(&row)).transpose()
    }
}
