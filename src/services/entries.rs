use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex},
    time::Duration,
};

use chrono::Utc;
use uuid::Uuid;

use super::{
    access::AccessService,
    conversations::ConversationService,
    error::{ServiceError, ServiceResult},
};
use crate::{
    ancestry,
    cache::{CachedEntries, EntryCache},
    crypto::ContentCrypto,
    db::{DbPool, EntryCursor, cursor::truncate_to_millis},
    models::{
        AccessLevel, AppendEntry, AppendRequest, AppendResult, Channel, Conversation,
        CreateConversation, Entry, EntryView, EpochFilter, HistoryMessage,
    },
};

const DEFAULT_ENTRY_LIMIT: i64 = 50;
const MAX_ENTRY_LIMIT: i64 = 200;
const DERIVED_TITLE_CHARS: usize = 40;

/// Monotonic v7 ids: `(created_at, id)` ordering must match insertion
/// order even when a batch lands within one millisecond.
static V7_CONTEXT: LazyLock<Mutex<uuid::timestamp::context::ContextV7>> =
    LazyLock::new(|| Mutex::new(uuid::timestamp::context::ContextV7::new()));

pub(super) fn next_entry_id() -> Uuid {
    let context = V7_CONTEXT.lock().unwrap();
    Uuid::new_v7(uuid::Timestamp::now(&*context))
}

/// Read parameters for an entry listing.
#[derive(Debug, Clone)]
pub struct EntryReadParams {
    pub channel: Channel,
    /// Required for MEMORY reads.
    pub client_id: Option<String>,
    pub epoch_filter: EpochFilter,
    /// Skip ancestry filtering and return the whole group's stream.
    pub all_forks: bool,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

impl Default for EntryReadParams {
    fn default() -> Self {
        Self {
            channel: Channel::History,
            client_id: None,
            epoch_filter: EpochFilter::Latest,
            all_forks: false,
            limit: None,
            cursor: None,
        }
    }
}

/// One page of entries with an opaque resume cursor.
#[derive(Debug)]
pub struct EntryPage {
    pub items: Vec<EntryView>,
    pub next_cursor: Option<String>,
}

/// Append and read entries. Reads run through the fork/ancestry filter;
/// LATEST memory reads are served via the entry cache.
#[derive(Clone)]
pub struct EntryService {
    db: Arc<DbPool>,
    crypto: Arc<ContentCrypto>,
    access: AccessService,
    conversations: ConversationService,
    cache: Arc<dyn EntryCache>,
    cache_ttl: Duration,
}

impl EntryService {
    pub fn new(
        db: Arc<DbPool>,
        crypto: Arc<ContentCrypto>,
        access: AccessService,
        conversations: ConversationService,
        cache: Arc<dyn EntryCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            db,
            crypto,
            access,
            conversations,
            cache,
            cache_ttl,
        }
    }

    // ==================== Append ====================

    /// Append a batch of entries. A missing conversation is auto-created
    /// with the caller-chosen id (honoring fork metadata); all inserted
    /// entries share one `created_at` and the whole batch is
    /// all-or-nothing.
    pub async fn append(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        request: AppendRequest,
    ) -> ServiceResult<AppendResult> {
        if request.entries.is_empty() {
            return Err(ServiceError::Validation(
                "Append requires at least one entry".to_string(),
            ));
        }

        let client_id = request.client_id.as_deref();
        for entry in &request.entries {
            validate_append_entry(entry, client_id)?;
        }

        let (conversation, created) = self
            .resolve_or_create(user_id, conversation_id, &request)
            .await?;

        let now = truncate_to_millis(Utc::now());
        let mut rows = Vec::with_capacity(request.entries.len());
        let mut views = Vec::with_capacity(request.entries.len());
        for entry in &request.entries {
            let plaintext = serde_json::to_vec(&entry.content)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
            let content = self.crypto.encrypt(&plaintext)?;
            let epoch = match entry.channel {
                Channel::Memory => Some(entry.epoch.unwrap_or(1)),
                Channel::History => None,
            };

            let row = Entry {
                id: next_entry_id(),
                conversation_id: conversation.id,
                conversation_group_id: conversation.conversation_group_id,
                user_id: Some(user_id.to_string()),
                client_id: match entry.channel {
                    Channel::Memory => client_id.map(|c| c.to_string()),
                    Channel::History => None,
                },
                channel: entry.channel,
                epoch,
                content_type: entry.content_type.clone(),
                content,
                indexed_content: entry.indexed_content.clone(),
                indexed_at: None,
                created_at: now,
            };
            views.push(self.view_from_plaintext(&row, entry.content.clone()));
            rows.push(row);
        }

        self.db.entries().insert_batch(&rows).await?;

        let appended_history = rows.iter().any(|e| e.channel == Channel::History);
        let appended_memory = rows.iter().any(|e| e.channel == Channel::Memory);

        if conversation.title.is_none()
            && let Some(first_history) = request
                .entries
                .iter()
                .find(|e| e.channel == Channel::History)
            && let Some(title) = derive_title(&first_history.content)
        {
            let ciphertext = self.crypto.encrypt(title.as_bytes())?;
            self.db
                .conversations()
                .set_title_if_absent(conversation.id, &ciphertext)
                .await?;
        }

        if appended_history {
            self.db
                .conversations()
                .touch_updated_at(conversation.id, now)
                .await?;
        }

        if appended_memory && let Some(client_id) = client_id {
            self.refresh_memory_cache(&conversation, client_id).await?;
        }

        Ok(AppendResult {
            conversation_id: conversation.id,
            entries: views,
            created_conversation: created,
        })
    }

    /// Load the target conversation, auto-creating it when absent. The
    /// caller ends up with WRITER or better either way.
    pub(super) async fn resolve_or_create(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        request: &AppendRequest,
    ) -> ServiceResult<(Conversation, bool)> {
        if let Some(existing) = self.db.conversations().get(conversation_id, true).await? {
            if existing.deleted_at.is_some() {
                return Err(ServiceError::NotFound);
            }
            self.access
                .require_access(user_id, existing.conversation_group_id, AccessLevel::Writer)
                .await?;
            return Ok((existing, false));
        }

        self.conversations
            .create(
                user_id,
                CreateConversation {
                    id: Some(conversation_id),
                    title: None,
                    metadata: HashMap::new(),
                    forked_at_conversation_id: request.forked_at_conversation_id,
                    forked_at_entry_id: request.forked_at_entry_id,
                },
            )
            .await?;

        let conversation = self
            .db
            .conversations()
            .get(conversation_id, false)
            .await?
            .ok_or_else(|| {
                ServiceError::Internal("Auto-created conversation vanished".to_string())
            })?;
        self.access
            .require_access(user_id, conversation.conversation_group_id, AccessLevel::Writer)
            .await?;
        Ok((conversation, true))
    }

    // ==================== Reads ====================

    /// List entries visible from a conversation. Requires READER.
    pub async fn list(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        params: EntryReadParams,
    ) -> ServiceResult<EntryPage> {
        let (conversation, _) = self
            .access
            .resolve_conversation(conversation_id, user_id, AccessLevel::Reader)
            .await?;

        let limit = params
            .limit
            .unwrap_or(DEFAULT_ENTRY_LIMIT)
            .clamp(1, MAX_ENTRY_LIMIT);
        let cursor = params
            .cursor
            .as_deref()
            .map(EntryCursor::decode)
            .transpose()
            .map_err(|e| ServiceError::Validation(format!("Invalid cursor: {}", e)))?
            .map(|c| c.0);

        match params.channel {
            Channel::History => {
                let entries = if params.all_forks {
                    self.db
                        .entries()
                        .list_group_entries(
                            conversation.conversation_group_id,
                            Some(Channel::History),
                            None,
                        )
                        .await?
                } else {
                    self.visible_entries(&conversation, Channel::History, None)
                        .await?
                };
                self.paginate(entries, cursor, limit)
            }
            Channel::Memory => {
                let client_id = params
                    .client_id
                    .as_deref()
                    .filter(|c| !c.is_empty())
                    .ok_or(ServiceError::Forbidden)?;
                self.list_memory(&conversation, client_id, &params, cursor, limit)
                    .await
            }
        }
    }

    async fn list_memory(
        &self,
        conversation: &Conversation,
        client_id: &str,
        params: &EntryReadParams,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> ServiceResult<EntryPage> {
        // The cached path covers only the default read shape: LATEST over
        // the fork-filtered stream.
        if params.epoch_filter == EpochFilter::Latest && !params.all_forks {
            if self.cache.available()
                && let Some(cached) = self.cache.get(conversation.id, client_id).await?
            {
                let epoch = cached.epoch;
                let entries: Vec<Entry> = cached
                    .entries
                    .into_iter()
                    .map(|e| e.into_entry(client_id, epoch))
                    .collect();
                return self.paginate(entries, cursor, limit);
            }

            let (epoch, entries) = self.latest_memory_set(conversation, client_id).await?;
            if self.cache.available() && !entries.is_empty() {
                self.cache
                    .set(
                        conversation.id,
                        client_id,
                        &CachedEntries::from_entries(epoch, &entries),
                        self.cache_ttl,
                    )
                    .await?;
            }
            return self.paginate(entries, cursor, limit);
        }

        let stream = if params.all_forks {
            self.db
                .entries()
                .list_group_entries(
                    conversation.conversation_group_id,
                    Some(Channel::Memory),
                    Some(client_id),
                )
                .await?
        } else {
            self.visible_entries(conversation, Channel::Memory, Some(client_id))
                .await?
        };

        let entries = match params.epoch_filter {
            EpochFilter::All => stream,
            EpochFilter::Epoch(n) => stream.into_iter().filter(|e| e.epoch == Some(n)).collect(),
            EpochFilter::Latest => {
                let max = stream.iter().filter_map(|e| e.epoch).max();
                stream.into_iter().filter(|e| e.epoch == max).collect()
            }
        };
        self.paginate(entries, cursor, limit)
    }

    /// Substring search over indexed history content, scoped to the
    /// caller's groups.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<EntryView>> {
        if query.is_empty() {
            return Err(ServiceError::Validation(
                "Search query cannot be empty".to_string(),
            ));
        }
        let limit = limit
            .unwrap_or(DEFAULT_ENTRY_LIMIT)
            .clamp(1, MAX_ENTRY_LIMIT);
        let group_ids = self.db.memberships().group_ids_for_user(user_id).await?;
        let entries = self
            .db
            .entries()
            .search_indexed_content(query, Some(&group_ids), limit)
            .await?;
        entries.iter().map(|e| self.to_view(e)).collect()
    }

    // ==================== Shared memory helpers ====================

    /// Ancestry-filtered entries visible from a conversation.
    pub(super) async fn visible_entries(
        &self,
        conversation: &Conversation,
        channel: Channel,
        client_id: Option<&str>,
    ) -> ServiceResult<Vec<Entry>> {
        let group_conversations = self
            .db
            .conversations()
            .list_group(conversation.conversation_group_id, false)
            .await?;
        let by_id: HashMap<Uuid, Conversation> =
            group_conversations.into_iter().map(|c| (c.id, c)).collect();
        let stack = ancestry::build_ancestry(&by_id, conversation.id)?;

        let stream = self
            .db
            .entries()
            .list_group_entries(
                conversation.conversation_group_id,
                Some(channel),
                client_id,
            )
            .await?;
        Ok(ancestry::filter_visible(&stream, &stack)
            .into_iter()
            .cloned()
            .collect())
    }

    /// The latest-epoch memory set for `(conversation, client)` over the
    /// ancestry-filtered stream, straight from the datastore.
    pub(super) async fn latest_memory_set(
        &self,
        conversation: &Conversation,
        client_id: &str,
    ) -> ServiceResult<(Option<i64>, Vec<Entry>)> {
        let visible = self
            .visible_entries(conversation, Channel::Memory, Some(client_id))
            .await?;
        let max = visible.iter().filter_map(|e| e.epoch).max();
        let latest = visible.into_iter().filter(|e| e.epoch == max).collect();
        Ok((max, latest))
    }

    /// Write-through after a memory mutation: recompute the latest set
    /// and replace (or drop) the cache key.
    pub(super) async fn refresh_memory_cache(
        &self,
        conversation: &Conversation,
        client_id: &str,
    ) -> ServiceResult<()> {
        if !self.cache.available() {
            return Ok(());
        }

        let (epoch, entries) = self.latest_memory_set(conversation, client_id).await?;
        if entries.is_empty() {
            self.cache.remove(conversation.id, client_id).await?;
        } else {
            self.cache
                .set(
                    conversation.id,
                    client_id,
                    &CachedEntries::from_entries(epoch, &entries),
                    self.cache_ttl,
                )
                .await?;
        }
        Ok(())
    }

    // ==================== View building ====================

    pub(super) fn to_view(&self, entry: &Entry) -> ServiceResult<EntryView> {
        let plaintext = self.crypto.decrypt(&entry.content)?;
        let content: Vec<serde_json::Value> = serde_json::from_slice(&plaintext)
            .map_err(|e| ServiceError::Internal(format!("Stored content is not JSON: {}", e)))?;
        Ok(self.view_from_plaintext(entry, content))
    }

    fn view_from_plaintext(&self, entry: &Entry, content: Vec<serde_json::Value>) -> EntryView {
        EntryView {
            id: entry.id,
            conversation_id: entry.conversation_id,
            conversation_group_id: entry.conversation_group_id,
            user_id: entry.user_id.clone(),
            client_id: entry.client_id.clone(),
            channel: entry.channel,
            epoch: entry.epoch,
            content_type: entry.content_type.clone(),
            content,
            indexed_at: entry.indexed_at,
            created_at: entry.created_at,
        }
    }

    fn paginate(
        &self,
        entries: Vec<Entry>,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> ServiceResult<EntryPage> {
        let start = match cursor {
            Some(cursor_id) => {
                let position = entries
                    .iter()
                    .position(|e| e.id == cursor_id)
                    .ok_or_else(|| {
                        ServiceError::Validation("Cursor does not match the stream".to_string())
                    })?;
                position + 1
            }
            None => 0,
        };

        let remaining = &entries[start.min(entries.len())..];
        let has_more = remaining.len() as i64 > limit;
        let page = &remaining[..remaining.len().min(limit as usize)];

        let items = page
            .iter()
            .map(|e| self.to_view(e))
            .collect::<ServiceResult<Vec<_>>>()?;
        let next_cursor = if has_more {
            page.last().map(|e| EntryCursor(e.id).encode())
        } else {
            None
        };
        Ok(EntryPage { items, next_cursor })
    }
}

// ==================== Validation ====================

fn validate_append_entry(entry: &AppendEntry, client_id: Option<&str>) -> ServiceResult<()> {
    match entry.channel {
        Channel::History => {
            if entry.content_type != "history" && !entry.content_type.starts_with("history/") {
                return Err(ServiceError::Validation(format!(
                    "History entries require a history content type, got {}",
                    entry.content_type
                )));
            }
            if entry.epoch.is_some() {
                return Err(ServiceError::Validation(
                    "History entries cannot carry an epoch".to_string(),
                ));
            }
            if entry.content.len() != 1 {
                return Err(ServiceError::Validation(
                    "History content must be exactly one message object".to_string(),
                ));
            }
            serde_json::from_value::<HistoryMessage>(entry.content[0].clone()).map_err(|e| {
                ServiceError::Validation(format!("Invalid history message: {}", e))
            })?;
        }
        Channel::Memory => {
            if client_id.is_none_or(str::is_empty) {
                return Err(ServiceError::Forbidden);
            }
            if let Some(epoch) = entry.epoch
                && epoch < 1
            {
                return Err(ServiceError::Validation(format!(
                    "Memory epoch must be >= 1, got {}",
                    epoch
                )));
            }
            if entry.indexed_content.is_some() {
                return Err(ServiceError::Validation(
                    "indexed_content is only valid on history entries".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// First 40 characters of the whitespace-normalized message text.
fn derive_title(content: &[serde_json::Value]) -> Option<String> {
    let text = content.first()?.get("text")?.as_str()?;
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }
    Some(normalized.chars().take(DERIVED_TITLE_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn history_entry(content: serde_json::Value) -> AppendEntry {
        AppendEntry {
            channel: Channel::History,
            content_type: "history".to_string(),
            content: vec![content],
            epoch: None,
            indexed_content: None,
        }
    }

    #[test]
    fn test_validate_history_ok() {
        let entry = history_entry(json!({"text": "hello", "role": "USER"}));
        assert!(validate_append_entry(&entry, None).is_ok());
    }

    #[test]
    fn test_validate_history_subtype_ok() {
        let mut entry = history_entry(json!({"text": "hi", "role": "AI"}));
        entry.content_type = "history/markdown".to_string();
        assert!(validate_append_entry(&entry, None).is_ok());
    }

    #[test]
    fn test_validate_history_rejects_bad_role() {
        let entry = history_entry(json!({"text": "hello", "role": "SYSTEM"}));
        assert!(matches!(
            validate_append_entry(&entry, None),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_history_rejects_multiple_messages() {
        let mut entry = history_entry(json!({"text": "a", "role": "USER"}));
        entry.content.push(json!({"text": "b", "role": "AI"}));
        assert!(validate_append_entry(&entry, None).is_err());
    }

    #[test]
    fn test_validate_history_rejects_epoch() {
        let mut entry = history_entry(json!({"text": "a", "role": "USER"}));
        entry.epoch = Some(1);
        assert!(validate_append_entry(&entry, None).is_err());
    }

    #[test]
    fn test_validate_history_rejects_foreign_content_type() {
        let mut entry = history_entry(json!({"text": "a", "role": "USER"}));
        entry.content_type = "memory".to_string();
        assert!(validate_append_entry(&entry, None).is_err());
    }

    #[test]
    fn test_validate_memory_requires_client() {
        let entry = AppendEntry {
            channel: Channel::Memory,
            content_type: "memory".to_string(),
            content: vec![json!({"k": "v"})],
            epoch: None,
            indexed_content: None,
        };
        assert!(matches!(
            validate_append_entry(&entry, None),
            Err(ServiceError::Forbidden)
        ));
        assert!(matches!(
            validate_append_entry(&entry, Some("")),
            Err(ServiceError::Forbidden)
        ));
        assert!(validate_append_entry(&entry, Some("c1")).is_ok());
    }

    #[test]
    fn test_validate_memory_rejects_indexed_content() {
        let entry = AppendEntry {
            channel: Channel::Memory,
            content_type: "memory".to_string(),
            content: vec![],
            epoch: Some(1),
            indexed_content: Some("nope".to_string()),
        };
        assert!(validate_append_entry(&entry, Some("c1")).is_err());
    }

    #[test]
    fn test_validate_memory_rejects_zero_epoch() {
        let entry = AppendEntry {
            channel: Channel::Memory,
            content_type: "memory".to_string(),
            content: vec![],
            epoch: Some(0),
            indexed_content: None,
        };
        assert!(validate_append_entry(&entry, Some("c1")).is_err());
    }

    #[test]
    fn test_derive_title_normalizes_whitespace() {
        let content = vec![json!({"text": "  What   is\nthe answer? ", "role": "USER"})];
        assert_eq!(derive_title(&content).unwrap(), "What is the answer?");
    }

    #[test]
    fn test_derive_title_truncates_to_forty_chars() {
        let long = "x".repeat(100);
        let content = vec![json!({"text": long, "role": "USER"})];
        assert_eq!(derive_title(&content).unwrap().chars().count(), 40);
    }

    #[test]
    fn test_derive_title_empty_text() {
        let content = vec![json!({"text": "   ", "role": "USER"})];
        assert!(derive_title(&content).is_none());
    }

    #[test]
    fn test_entry_ids_are_monotonic() {
        let mut prev = next_entry_id();
        for _ in 0..1000 {
            let next = next_entry_id();
            assert!(next > prev);
            prev = next;
        }
    }
}
