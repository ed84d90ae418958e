use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Retention/eviction configuration.
///
/// Soft-deleted conversation groups older than the retention period are
/// hard-deleted by a background worker, together with their entries,
/// attachments, memberships and transfers. Optionally, superseded memory
/// epochs are reclaimed on the same schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the eviction worker runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Hours between eviction passes.
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Grace period before a soft-deleted group becomes evictable.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum number of groups hard-deleted per pass.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,

    /// Also reclaim memory epochs that are strictly older than the latest
    /// and whose newest entry is past the retention cutoff.
    #[serde(default)]
    pub evict_superseded_epochs: bool,

    /// Log what would be deleted without deleting anything.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_hours: default_interval_hours(),
            retention_days: default_retention_days(),
            batch_limit: default_batch_limit(),
            evict_superseded_epochs: false,
            dry_run: false,
        }
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval_hours == 0 {
            return Err(ConfigError::Validation(
                "retention interval_hours must be greater than 0".into(),
            ));
        }
        if self.enabled && self.batch_limit == 0 {
            return Err(ConfigError::Validation(
                "retention batch_limit must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval_hours() -> u64 {
    1
}

fn default_retention_days() -> u32 {
    30
}

fn default_batch_limit() -> u32 {
    100
}
