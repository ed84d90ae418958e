use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Task queue worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskQueueConfig {
    /// Whether the claim worker runs at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between claim polls when the queue is drained.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum tasks claimed per poll.
    #[serde(default = "default_claim_limit")]
    pub claim_limit: u32,

    /// Stale-claim window: a claimed task whose `processing_at` is older
    /// than this becomes claimable again.
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: u64,

    /// Base delay for exponential retry backoff.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// Upper bound on the retry delay.
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval(),
            claim_limit: default_claim_limit(),
            claim_ttl_secs: default_claim_ttl(),
            retry_base_secs: default_retry_base(),
            retry_max_secs: default_retry_max(),
        }
    }
}

impl TaskQueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_ttl_secs as i64)
    }

    /// Exponential backoff for the given retry count, capped.
    pub fn retry_delay(&self, retry_count: i32) -> chrono::Duration {
        let exp = retry_count.clamp(0, 16) as u32;
        let secs = self
            .retry_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.retry_max_secs);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "tasks poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.claim_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "tasks claim_ttl_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    15
}

fn default_claim_limit() -> u32 {
    20
}

fn default_claim_ttl() -> u64 {
    300 // 5 minutes
}

fn default_retry_base() -> u64 {
    30
}

fn default_retry_max() -> u64 {
    3600
}
