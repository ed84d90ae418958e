use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pending ownership handover. At most one exists per group.
///
/// On accept the target becomes OWNER, the previous owner is demoted to
/// MANAGER, every conversation in the group changes `owner_user_id`, and
/// the transfer row is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub id: Uuid,
    pub conversation_group_id: Uuid,
    pub from_user_id: String,
    pub to_user_id: String,
    pub created_at: DateTime<Utc>,
}
