use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Identity and retention boundary shared by a root conversation and all of
/// its forks. Access control and deletion operate on the group, never on a
/// single fork.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationGroup {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A single linear timeline within a group.
///
/// `title` holds ciphertext: everything below the service layer operates on
/// encrypted bytes, and decryption happens when building a
/// [`ConversationDetail`].
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub owner_user_id: String,
    pub title: Option<Vec<u8>>,
    pub metadata: HashMap<String, String>,
    pub conversation_group_id: Uuid,
    /// Parent conversation when this is a fork. Always in the same group.
    pub forked_at_conversation_id: Option<Uuid>,
    /// Last parent entry visible to this fork (the predecessor of the
    /// entry the fork was requested at), or None when forked before the
    /// first entry.
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_fork(&self) -> bool {
        self.forked_at_conversation_id.is_some()
    }
}

/// Decrypted conversation view returned to callers, annotated with the
/// caller's access level.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub id: Uuid,
    pub owner_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metadata: HashMap<String, String>,
    pub conversation_group_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_conversation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub access_level: crate::models::AccessLevel,
}

/// Request to create a conversation, either a fresh root or a fork.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateConversation {
    /// Client-chosen id. Generated when absent.
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Parent conversation for a fork. The caller must hold READER on the
    /// parent's group; the new conversation joins that group.
    pub forked_at_conversation_id: Option<Uuid>,
    /// The entry the user asked to fork at. Persisted as that entry's
    /// immediate HISTORY predecessor.
    pub forked_at_entry_id: Option<Uuid>,
}

/// Request to update title and/or metadata.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateConversation {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Listing mode for non-admin conversation lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    /// Every non-deleted conversation in the caller's groups.
    All,
    /// Only conversations without fork metadata.
    Roots,
    /// At most one conversation per group: the most recently updated.
    #[default]
    LatestFork,
}

impl ListMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListMode::All => "all",
            ListMode::Roots => "roots",
            ListMode::LatestFork => "latest_fork",
        }
    }
}

impl std::str::FromStr for ListMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ListMode::All),
            "roots" => Ok(ListMode::Roots),
            "" | "latest_fork" => Ok(ListMode::LatestFork),
            _ => Err(format!("Invalid list mode: {}", s)),
        }
    }
}
