use uuid::Uuid;

/// Cache key construction, one place so every backend agrees.
pub struct CacheKeys;

impl CacheKeys {
    /// Latest-epoch memory entries for one (conversation, client).
    pub fn memory_entries(conversation_id: Uuid, client_id: &str) -> String {
        format!("mem:{}:{}", conversation_id, client_id)
    }
}
