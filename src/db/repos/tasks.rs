use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateTask, Task},
};

#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Enqueue a task with `retry_at = now`. When the request carries a
    /// `task_name`, upsert on the name so bursts of identical retry
    /// requests coalesce into a single outstanding row.
    async fn create(&self, input: CreateTask) -> DbResult<Task>;

    /// Atomically claim up to `limit` ready tasks: `retry_at <= now` and
    /// not claimed, or claimed longer ago than the claim TTL. Claimed rows
    /// get `processing_at = now` and `retry_at = now + claim_ttl`, so a
    /// crashed worker's tasks resurface on their own.
    async fn claim_ready(&self, limit: i64, claim_ttl: chrono::Duration) -> DbResult<Vec<Task>>;

    /// Record a failure: bump `retry_count`, clear the claim, and push
    /// `retry_at` out by `delay`.
    async fn fail(&self, id: Uuid, error: &str, delay: chrono::Duration) -> DbResult<()>;

    /// Remove a completed task.
    async fn delete(&self, id: Uuid) -> DbResult<()>;

    async fn get(&self, id: Uuid) -> DbResult<Option<Task>>;

    async fn get_by_name(&self, task_name: &str) -> DbResult<Option<Task>>;
}
