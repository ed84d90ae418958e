use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access level within a conversation group.
///
/// Ordered: READER < WRITER < MANAGER < OWNER. Every gate compares with the
/// derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    Reader,
    Writer,
    Manager,
    Owner,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Reader => "READER",
            AccessLevel::Writer => "WRITER",
            AccessLevel::Manager => "MANAGER",
            AccessLevel::Owner => "OWNER",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READER" => Ok(AccessLevel::Reader),
            "WRITER" => Ok(AccessLevel::Writer),
            "MANAGER" => Ok(AccessLevel::Manager),
            "OWNER" => Ok(AccessLevel::Owner),
            _ => Err(format!("Invalid access level: {}", s)),
        }
    }
}

/// Authorization record: one per (group, user). Exactly one OWNER exists
/// per group; memberships are hard-deleted with their group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub conversation_group_id: Uuid,
    pub user_id: String,
    pub access_level: AccessLevel,
    pub created_at: DateTime<Utc>,
}
