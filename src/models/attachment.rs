use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Blob metadata. The engine only tracks the record; bytes live in the
/// external blob store and are reclaimed through eviction tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    /// Entry this attachment is linked to. Unlinked uploads carry an
    /// `expires_at` TTL instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_group_id: Option<Uuid>,
    pub user_id: String,
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Request to register an uploaded blob.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAttachment {
    pub entry_id: Option<Uuid>,
    pub file_name: String,
    pub media_type: String,
    #[serde(default)]
    pub size_bytes: i64,
}
