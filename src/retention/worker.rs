//! Eviction worker.
//!
//! Soft-deleted groups older than the retention period are hard-deleted
//! in dependency order, with a vector-store cleanup task enqueued per
//! group first so the external index can drop its chunks. Optionally the
//! worker also reclaims memory epochs that have been superseded by a
//! newer one for longer than the retention period.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{
    config::RetentionConfig,
    db::DbPool,
    jobs::{VECTOR_CLEANUP_TASK_TYPE, VectorCleanupTask},
    models::CreateTask,
};

/// Results from a single eviction run.
#[derive(Debug, Default)]
pub struct EvictionRunResult {
    /// Number of conversation groups hard-deleted.
    pub groups_deleted: u64,
    /// Number of superseded memory epochs reclaimed.
    pub epochs_deleted: u64,
    /// Number of entries removed by epoch eviction.
    pub epoch_entries_deleted: u64,
    /// Number of expired unlinked attachment records dropped.
    pub attachments_expired: u64,
    /// Number of vector cleanup tasks enqueued.
    pub cleanup_tasks_enqueued: u64,
}

impl EvictionRunResult {
    pub fn has_deletions(&self) -> bool {
        self.groups_deleted > 0 || self.epochs_deleted > 0 || self.attachments_expired > 0
    }
}

/// Starts the eviction worker as a background task.
///
/// The worker runs in a loop, evicting at the configured interval until
/// the task is cancelled.
pub async fn start_eviction_worker(db: Arc<DbPool>, config: RetentionConfig) {
    if !config.enabled {
        tracing::info!("Eviction worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.dry_run { " (DRY RUN)" } else { "" };

    tracing::info!(
        interval_hours = config.interval_hours,
        retention_days = config.retention_days,
        batch_limit = config.batch_limit,
        evict_superseded_epochs = config.evict_superseded_epochs,
        dry_run = config.dry_run,
        "Starting eviction worker{}",
        dry_run_msg
    );

    let interval = config.interval();

    loop {
        match run_eviction(&db, &config).await {
            Ok(result) => {
                if result.has_deletions() {
                    tracing::info!(
                        groups = result.groups_deleted,
                        epochs = result.epochs_deleted,
                        epoch_entries = result.epoch_entries_deleted,
                        attachments_expired = result.attachments_expired,
                        cleanup_tasks = result.cleanup_tasks_enqueued,
                        dry_run = config.dry_run,
                        "Eviction run complete{}",
                        dry_run_msg
                    );
                } else {
                    tracing::debug!("Eviction run complete, nothing to evict");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error running eviction");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Run a single eviction pass.
pub async fn run_eviction(
    db: &Arc<DbPool>,
    config: &RetentionConfig,
) -> Result<EvictionRunResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut result = EvictionRunResult::default();
    let cutoff = Utc::now() - Duration::days(config.retention_days as i64);

    // ==================== Phase 1: groups past retention ====================
    let group_ids = db
        .conversations()
        .find_evictable_group_ids(cutoff, config.batch_limit as i64)
        .await?;

    if !group_ids.is_empty() {
        tracing::debug!(
            count = group_ids.len(),
            cutoff = %cutoff,
            "Found evictable conversation groups"
        );

        if config.dry_run {
            for group_id in &group_ids {
                tracing::info!(group_id = %group_id, "DRY RUN: Would hard-delete group");
            }
        } else {
            // Enqueue the index cleanup before the rows disappear; the
            // task body is all the handler needs.
            for group_id in &group_ids {
                let body = VectorCleanupTask::Group { group_id: *group_id };
                db.tasks()
                    .create(CreateTask {
                        task_type: VECTOR_CLEANUP_TASK_TYPE.to_string(),
                        task_name: body.singleton_name(),
                        body: serde_json::to_value(&body)?,
                    })
                    .await?;
                result.cleanup_tasks_enqueued += 1;
            }

            result.groups_deleted = db.conversations().hard_delete_groups(&group_ids).await?;
        }
    }

    // ==================== Phase 2: superseded memory epochs ====================
    if config.evict_superseded_epochs {
        let superseded = db
            .entries()
            .find_superseded_epochs(cutoff, config.batch_limit as i64)
            .await?;

        for epoch in superseded {
            if config.dry_run {
                tracing::info!(
                    conversation_id = %epoch.conversation_id,
                    client_id = %epoch.client_id,
                    epoch = epoch.epoch,
                    "DRY RUN: Would delete superseded epoch"
                );
                result.epochs_deleted += 1;
                continue;
            }

            let entry_ids = db
                .entries()
                .delete_epoch(epoch.conversation_id, &epoch.client_id, epoch.epoch)
                .await?;
            if entry_ids.is_empty() {
                continue;
            }

            result.epochs_deleted += 1;
            result.epoch_entries_deleted += entry_ids.len() as u64;

            let body = VectorCleanupTask::Entries { entry_ids };
            db.tasks()
                .create(CreateTask {
                    task_type: VECTOR_CLEANUP_TASK_TYPE.to_string(),
                    task_name: None,
                    body: serde_json::to_value(&body)?,
                })
                .await?;
            result.cleanup_tasks_enqueued += 1;
        }
    }

    // ==================== Phase 3: expired unlinked uploads ====================
    if !config.dry_run {
        result.attachments_expired = db
            .attachments()
            .delete_expired_unlinked(Utc::now(), config.batch_limit as i64)
            .await?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_run_result_default() {
        let result = EvictionRunResult::default();
        assert_eq!(result.groups_deleted, 0);
        assert_eq!(result.epochs_deleted, 0);
        assert!(!result.has_deletions());
    }

    #[test]
    fn test_eviction_run_result_has_deletions() {
        let with_groups = EvictionRunResult {
            groups_deleted: 1,
            ..Default::default()
        };
        assert!(with_groups.has_deletions());

        let with_epochs = EvictionRunResult {
            epochs_deleted: 2,
            ..Default::default()
        };
        assert!(with_epochs.has_deletions());
    }
}
