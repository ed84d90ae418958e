use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task_worker::TaskHandler;
use crate::models::Task;

pub const VECTOR_CLEANUP_TASK_TYPE: &str = "vector_store_cleanup";

/// Purge hook into the external vector index. The engine never talks to
/// the index directly; eviction enqueues cleanup tasks whose handler
/// calls this boundary.
#[async_trait]
pub trait VectorIndexPurge: Send + Sync {
    /// Remove every chunk belonging to a conversation group.
    async fn purge_group(
        &self,
        group_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Remove the chunks of specific entries.
    async fn purge_entries(
        &self,
        entry_ids: &[Uuid],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Used when no vector index is wired up; cleanup tasks then only log.
pub struct NoopVectorIndex;

#[async_trait]
impl VectorIndexPurge for NoopVectorIndex {
    async fn purge_group(
        &self,
        group_id: Uuid,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!(group_id = %group_id, "No vector index configured, skipping purge");
        Ok(())
    }

    async fn purge_entries(
        &self,
        entry_ids: &[Uuid],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!(count = entry_ids.len(), "No vector index configured, skipping purge");
        Ok(())
    }
}

/// Body of a vector cleanup task: either a whole group or a set of
/// entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum VectorCleanupTask {
    Group { group_id: Uuid },
    Entries { entry_ids: Vec<Uuid> },
}

impl VectorCleanupTask {
    /// Singleton name for group-scoped cleanups, so retried evictions of
    /// the same group coalesce.
    pub fn singleton_name(&self) -> Option<String> {
        match self {
            VectorCleanupTask::Group { group_id } => {
                Some(format!("{}:{}", VECTOR_CLEANUP_TASK_TYPE, group_id))
            }
            VectorCleanupTask::Entries { .. } => None,
        }
    }
}

pub struct VectorCleanupHandler {
    index: Arc<dyn VectorIndexPurge>,
}

impl VectorCleanupHandler {
    pub fn new(index: Arc<dyn VectorIndexPurge>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl TaskHandler for VectorCleanupHandler {
    fn task_type(&self) -> &'static str {
        VECTOR_CLEANUP_TASK_TYPE
    }

    async fn handle(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let body: VectorCleanupTask = serde_json::from_value(task.body.clone())?;
        match body {
            VectorCleanupTask::Group { group_id } => self.index.purge_group(group_id).await,
            VectorCleanupTask::Entries { entry_ids } => {
                self.index.purge_entries(&entry_ids).await
            }
        }
    }
}
