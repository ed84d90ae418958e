use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{config::TaskQueueConfig, db::DbPool, models::Task};

/// Handler for one task type. Returning an error reschedules the task
/// with exponential backoff; returning Ok deletes it.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    async fn handle(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Claims ready tasks and dispatches them to registered handlers.
pub struct TaskWorker {
    db: Arc<DbPool>,
    config: TaskQueueConfig,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskWorker {
    pub fn new(db: Arc<DbPool>, config: TaskQueueConfig) -> Self {
        Self {
            db,
            config,
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.task_type(), handler);
        self
    }

    /// Claim and process one batch. Returns the number of tasks claimed.
    pub async fn run_once(&self) -> Result<usize, crate::db::DbError> {
        let tasks = self
            .db
            .tasks()
            .claim_ready(self.config.claim_limit as i64, self.config.claim_ttl())
            .await?;
        let claimed = tasks.len();

        for task in tasks {
            self.process(task).await;
        }
        Ok(claimed)
    }

    async fn process(&self, task: Task) {
        let Some(handler) = self.handlers.get(task.task_type.as_str()) else {
            tracing::warn!(
                task_id = %task.id,
                task_type = %task.task_type,
                "No handler registered for task type"
            );
            let delay = self.config.retry_delay(task.retry_count);
            if let Err(e) = self
                .db
                .tasks()
                .fail(task.id, "no handler registered", delay)
                .await
            {
                tracing::error!(task_id = %task.id, error = %e, "Failed to reschedule task");
            }
            return;
        };

        match handler.handle(&task).await {
            Ok(()) => {
                if let Err(e) = self.db.tasks().delete(task.id).await {
                    tracing::error!(
                        task_id = %task.id,
                        error = %e,
                        "Task succeeded but could not be deleted; it will re-run"
                    );
                }
            }
            Err(e) => {
                let delay = self.config.retry_delay(task.retry_count);
                tracing::warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    retry_count = task.retry_count,
                    delay_secs = delay.num_seconds(),
                    error = %e,
                    "Task failed, rescheduling"
                );
                if let Err(e) = self
                    .db
                    .tasks()
                    .fail(task.id, &e.to_string(), delay)
                    .await
                {
                    tracing::error!(task_id = %task.id, error = %e, "Failed to reschedule task");
                }
            }
        }
    }
}

/// Starts the task worker as a background task.
///
/// The worker polls the queue at the configured interval and drains it
/// batch by batch. It runs until the task is cancelled.
pub async fn start_task_worker(worker: TaskWorker) {
    if !worker.config.enabled {
        tracing::info!("Task worker disabled by configuration");
        return;
    }

    tracing::info!(
        poll_interval_secs = worker.config.poll_interval_secs,
        claim_limit = worker.config.claim_limit,
        claim_ttl_secs = worker.config.claim_ttl_secs,
        "Starting task worker"
    );

    let interval = worker.config.poll_interval();

    loop {
        match worker.run_once().await {
            // A full batch suggests more work is ready; keep draining.
            Ok(claimed) if claimed as u32 >= worker.config.claim_limit => continue,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Error claiming tasks");
            }
        }
        tokio::time::sleep(interval).await;
    }
}
