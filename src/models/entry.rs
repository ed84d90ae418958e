use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical partition of entries within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// User-visible transcript.
    History,
    /// Agent-maintained per-client state, versioned by epoch.
    Memory,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::History => "history",
            Channel::Memory => "memory",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "history" => Ok(Channel::History),
            "memory" => Ok(Channel::Memory),
            _ => Err(format!("Invalid channel: {}", s)),
        }
    }
}

/// Role carried by a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "AI")]
    Ai,
}

/// The single object a history entry's content array must contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryMessage {
    pub text: String,
    pub role: MessageRole,
}

/// One atomic item on a channel.
///
/// `content` holds ciphertext of a JSON array. Entries are immutable once
/// written except for `indexed_content` and `indexed_at`.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub conversation_group_id: Uuid,
    pub user_id: Option<String>,
    pub client_id: Option<String>,
    pub channel: Channel,
    pub epoch: Option<i64>,
    pub content_type: String,
    pub content: Vec<u8>,
    pub indexed_content: Option<String>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Decrypted entry view returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub conversation_group_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<i64>,
    pub content_type: String,
    /// Decrypted JSON array.
    pub content: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One entry in an append request. Content is the plaintext JSON array;
/// encryption happens at the storage boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendEntry {
    pub channel: Channel,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub content: Vec<serde_json::Value>,
    /// Explicit epoch for memory entries. Defaults to 1 when absent.
    pub epoch: Option<i64>,
    /// Plaintext extract for full-text/vector indexing. History only.
    pub indexed_content: Option<String>,
}

fn default_content_type() -> String {
    "history".to_string()
}

/// A batch append. When the target conversation does not exist it is
/// auto-created with the request's fork metadata, exactly as an explicit
/// create would.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendRequest {
    pub entries: Vec<AppendEntry>,
    /// Required when any entry targets the MEMORY channel.
    pub client_id: Option<String>,
    pub forked_at_conversation_id: Option<Uuid>,
    pub forked_at_entry_id: Option<Uuid>,
}

impl AppendRequest {
    pub fn history(entries: Vec<AppendEntry>) -> Self {
        Self {
            entries,
            client_id: None,
            forked_at_conversation_id: None,
            forked_at_entry_id: None,
        }
    }
}

/// Outcome of an append call.
#[derive(Debug)]
pub struct AppendResult {
    pub conversation_id: Uuid,
    pub entries: Vec<EntryView>,
    /// Whether the conversation was auto-created by this call.
    pub created_conversation: bool,
}

/// One memory sync request: the client's complete intended memory content
/// for its current epoch.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub client_id: String,
    #[serde(default = "default_memory_content_type")]
    pub content_type: String,
    pub content: Vec<serde_json::Value>,
    pub forked_at_conversation_id: Option<Uuid>,
    pub forked_at_entry_id: Option<Uuid>,
}

fn default_memory_content_type() -> String {
    "memory".to_string()
}

/// Outcome of a memory sync.
#[derive(Debug)]
pub struct SyncResult {
    pub no_op: bool,
    pub epoch_incremented: bool,
    pub epoch: Option<i64>,
    pub entry: Option<EntryView>,
}

/// Epoch selector for memory reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpochFilter {
    /// Entries belonging to the greatest epoch in the visible stream.
    #[default]
    Latest,
    /// Entries of one specific epoch.
    Epoch(i64),
    /// Every memory entry for the client in the visible stream.
    All,
}

impl std::str::FromStr for EpochFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "latest" => Ok(EpochFilter::Latest),
            "all" => Ok(EpochFilter::All),
            other => match other.parse::<i64>() {
                Ok(n) if n >= 1 => Ok(EpochFilter::Epoch(n)),
                Ok(n) => Err(format!("Epoch must be >= 1, got {}", n)),
                Err(_) => Err(format!("Invalid epoch filter: {}", other)),
            },
        }
    }
}

/// Request to attach indexable plaintext to a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntryRequest {
    pub entry_id: Uuid,
    pub conversation_id: Uuid,
    pub indexed_content: String,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", EpochFilter::Latest)]
    #[case("latest", EpochFilter::Latest)]
    #[case("all", EpochFilter::All)]
    #[case("1", EpochFilter::Epoch(1))]
    #[case("42", EpochFilter::Epoch(42))]
    fn test_epoch_filter_parse(#[case] input: &str, #[case] expected: EpochFilter) {
        assert_eq!(input.parse::<EpochFilter>().unwrap(), expected);
    }

    #[rstest]
    #[case("0")]
    #[case("-3")]
    #[case("newest")]
    fn test_epoch_filter_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<EpochFilter>().is_err());
    }

    #[test]
    fn test_channel_round_trip() {
        assert_eq!("history".parse::<Channel>().unwrap(), Channel::History);
        assert_eq!("memory".parse::<Channel>().unwrap(), Channel::Memory);
        assert!("audit".parse::<Channel>().is_err());
    }

    #[test]
    fn test_history_message_role_serde() {
        let msg: HistoryMessage =
            serde_json::from_str(r#"{"text":"hi","role":"USER"}"#).unwrap();
        assert_eq!(msg.role, MessageRole::User);
        let json = serde_json::to_value(&HistoryMessage {
            text: "ok".into(),
            role: MessageRole::Ai,
        })
        .unwrap();
        assert_eq!(json["role"], "AI");
    }
}
