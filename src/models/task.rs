use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work item on the at-least-once task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Singleton key: at most one outstanding task per name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    pub task_type: String,
    pub body: serde_json::Value,
    /// Earliest time the task may be claimed (again).
    pub retry_at: DateTime<Utc>,
    /// Set while a worker holds the claim; stale claims are reclaimable
    /// after the claim TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to enqueue a task.
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub task_type: String,
    pub body: serde_json::Value,
    /// When set, upserts on the name instead of inserting a new row.
    pub task_name: Option<String>,
}

impl CreateTask {
    pub fn new(task_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            body,
            task_name: None,
        }
    }

    pub fn singleton(
        task_type: impl Into<String>,
        task_name: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            body,
            task_name: Some(task_name.into()),
        }
    }
}
