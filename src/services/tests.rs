//! End-to-end service scenarios against an in-memory SQLite datastore.
//!
//! These exercise the full stack below the transport: access control,
//! fork visibility, the memory-sync state machine, cache coherence,
//! ownership transfers, delete/restore, indexing, and eviction.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::{
    cache::MemoryEntryCache,
    config::{EncryptionConfig, MemoryCacheConfig, RetentionConfig},
    crypto::ContentCrypto,
    db::DbPool,
    db::tests::harness::create_sqlite_db,
    models::{
        AccessLevel, AppendEntry, AppendRequest, Channel, CreateConversation, EpochFilter,
        ListMode, SyncRequest, UpdateConversation,
    },
};

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

async fn setup() -> (Services, Arc<DbPool>) {
    let db = Arc::new(create_sqlite_db().await);
    let crypto = Arc::new(
        ContentCrypto::from_config(&EncryptionConfig {
            key: Some(TEST_KEY.to_string()),
            decryption_keys: vec![],
        })
        .expect("Failed to build crypto"),
    );
    let cache = Arc::new(MemoryEntryCache::new(&MemoryCacheConfig::default()));
    let services = Services::new(db.clone(), crypto, cache, Duration::from_secs(300));
    (services, db)
}

fn history(text: &str) -> AppendEntry {
    AppendEntry {
        channel: Channel::History,
        content_type: "history".to_string(),
        content: vec![json!({"text": text, "role": "USER"})],
        epoch: None,
        indexed_content: None,
    }
}

fn sync_request(client_id: &str, content: Vec<serde_json::Value>) -> SyncRequest {
    SyncRequest {
        client_id: client_id.to_string(),
        content_type: "memory".to_string(),
        content,
        forked_at_conversation_id: None,
        forked_at_entry_id: None,
    }
}

fn memory_read(client_id: &str, filter: EpochFilter) -> EntryReadParams {
    EntryReadParams {
        channel: Channel::Memory,
        client_id: Some(client_id.to_string()),
        epoch_filter: filter,
        ..Default::default()
    }
}

async fn read_memory_content(
    services: &Services,
    user: &str,
    conversation_id: Uuid,
    client_id: &str,
) -> Vec<serde_json::Value> {
    let page = services
        .entries
        .list(user, conversation_id, memory_read(client_id, EpochFilter::Latest))
        .await
        .expect("Memory read failed");
    page.items
        .into_iter()
        .flat_map(|e| e.content)
        .collect()
}

// ============================================================================
// Memory sync lifecycle
// ============================================================================

#[tokio::test]
async fn test_memory_sync_lifecycle() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();

    // Initial sync auto-creates the conversation and starts epoch 1; no
    // prior latest existed, so the epoch does not count as incremented.
    let first = services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"k": "a"})]),
        )
        .await
        .expect("Sync failed");
    assert!(!first.no_op);
    assert!(!first.epoch_incremented);
    assert_eq!(first.epoch, Some(1));
    assert_eq!(first.entry.as_ref().unwrap().content, vec![json!({"k": "a"})]);

    // Prefix-extend: only the delta tail is stored, same epoch.
    let second = services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"k": "a"}), json!({"k": "b"})]),
        )
        .await
        .expect("Sync failed");
    assert!(!second.no_op);
    assert!(!second.epoch_incremented);
    assert_eq!(second.epoch, Some(1));
    assert_eq!(
        second.entry.as_ref().unwrap().content,
        vec![json!({"k": "b"})]
    );

    // Identical resync is a no-op.
    let third = services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"k": "a"}), json!({"k": "b"})]),
        )
        .await
        .expect("Sync failed");
    assert!(third.no_op);
    assert_eq!(third.epoch, Some(1));
    assert!(third.entry.is_none());

    // Diverge: new epoch with the full incoming content.
    let fourth = services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"k": "z"})]),
        )
        .await
        .expect("Sync failed");
    assert!(!fourth.no_op);
    assert!(fourth.epoch_incremented);
    assert_eq!(fourth.epoch, Some(2));

    let latest = read_memory_content(&services, "alice", conversation_id, "c1").await;
    assert_eq!(latest, vec![json!({"k": "z"})]);
}

#[tokio::test]
async fn test_memory_sync_clear() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();

    services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"k": "a"})]),
        )
        .await
        .expect("Sync failed");

    let cleared = services
        .memory_sync
        .sync("alice", conversation_id, sync_request("c1", vec![]))
        .await
        .expect("Sync failed");
    assert!(!cleared.no_op);
    assert!(cleared.epoch_incremented);
    assert_eq!(cleared.epoch, Some(2));
    assert!(cleared.entry.as_ref().unwrap().content.is_empty());

    let latest = read_memory_content(&services, "alice", conversation_id, "c1").await;
    assert!(latest.is_empty());

    // Clearing an empty memory is a no-op.
    let again = services
        .memory_sync
        .sync("alice", conversation_id, sync_request("c1", vec![]))
        .await
        .expect("Sync failed");
    assert!(again.no_op);
    assert_eq!(again.epoch, Some(2));
}

#[tokio::test]
async fn test_memory_sync_clients_are_independent() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();

    services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"c": 1})]),
        )
        .await
        .expect("Sync failed");
    let other = services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c2", vec![json!({"c": 2})]),
        )
        .await
        .expect("Sync failed");
    // c2 starts its own epoch lineage.
    assert_eq!(other.epoch, Some(1));

    assert_eq!(
        read_memory_content(&services, "alice", conversation_id, "c1").await,
        vec![json!({"c": 1})]
    );
    assert_eq!(
        read_memory_content(&services, "alice", conversation_id, "c2").await,
        vec![json!({"c": 2})]
    );
}

#[tokio::test]
async fn test_concurrent_syncs_serialize_per_client() {
    let (services, db) = setup().await;
    let conversation_id = Uuid::new_v4();

    // Seed so both racers share a starting epoch.
    services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"seed": true})]),
        )
        .await
        .expect("Sync failed");

    let a = services.memory_sync.sync(
        "alice",
        conversation_id,
        sync_request("c1", vec![json!({"racer": "a"})]),
    );
    let b = services.memory_sync.sync(
        "alice",
        conversation_id,
        sync_request("c1", vec![json!({"racer": "b"})]),
    );
    let (ra, rb) = tokio::join!(a, b);
    let (ra, rb) = (ra.expect("Sync failed"), rb.expect("Sync failed"));

    // Serialized on the per-(conversation, client) lock: the second racer
    // observed the first one's write, so the epochs differ.
    assert_ne!(ra.epoch, rb.epoch);

    let conversation = db
        .conversations()
        .get(conversation_id, false)
        .await
        .expect("Failed to get")
        .expect("Should exist");
    let entries = db
        .entries()
        .list_group_entries(
            conversation.conversation_group_id,
            Some(Channel::Memory),
            Some("c1"),
        )
        .await
        .expect("Failed to list");

    // One entry per epoch, no duplicates.
    let mut epochs: Vec<i64> = entries.iter().filter_map(|e| e.epoch).collect();
    epochs.sort();
    assert_eq!(epochs, vec![1, 2, 3]);

    // The LATEST read reflects whichever racer won the last write.
    let latest = read_memory_content(&services, "alice", conversation_id, "c1").await;
    let max_epoch = rb.epoch.max(ra.epoch);
    let winner = if ra.epoch == max_epoch { ra } else { rb };
    assert_eq!(latest, winner.entry.unwrap().content);
}

#[tokio::test]
async fn test_memory_read_requires_client_id() {
    let (services, _db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");

    let no_client = services
        .entries
        .list(
            "alice",
            conversation.id,
            EntryReadParams {
                channel: Channel::Memory,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(no_client, Err(ServiceError::Forbidden)));
}

#[tokio::test]
async fn test_epoch_filter_reads() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();

    services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"v": 1})]),
        )
        .await
        .expect("Sync failed");
    services
        .memory_sync
        .sync(
            "alice",
            conversation_id,
            sync_request("c1", vec![json!({"v": 2})]),
        )
        .await
        .expect("Sync failed");

    let epoch1 = services
        .entries
        .list(
            "alice",
            conversation_id,
            memory_read("c1", EpochFilter::Epoch(1)),
        )
        .await
        .expect("Read failed");
    assert_eq!(epoch1.items.len(), 1);
    assert_eq!(epoch1.items[0].content, vec![json!({"v": 1})]);

    let all = services
        .entries
        .list("alice", conversation_id, memory_read("c1", EpochFilter::All))
        .await
        .expect("Read failed");
    assert_eq!(all.items.len(), 2);

    let latest = services
        .entries
        .list(
            "alice",
            conversation_id,
            memory_read("c1", EpochFilter::Latest),
        )
        .await
        .expect("Read failed");
    assert_eq!(latest.items.len(), 1);
    assert_eq!(latest.items[0].epoch, Some(2));
}

// ============================================================================
// Fork visibility
// ============================================================================

#[tokio::test]
async fn test_fork_visibility() {
    let (services, _db) = setup().await;
    let parent = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");

    let mut entry_ids = Vec::new();
    for text in ["e1", "e2", "e3"] {
        let result = services
            .entries
            .append(
                "alice",
                parent.id,
                AppendRequest::history(vec![history(text)]),
            )
            .await
            .expect("Append failed");
        entry_ids.push(result.entries[0].id);
    }

    // Fork at e3: the stored fork point is its predecessor e2.
    let fork = services
        .conversations
        .create(
            "alice",
            CreateConversation {
                forked_at_conversation_id: Some(parent.id),
                forked_at_entry_id: Some(entry_ids[2]),
                ..Default::default()
            },
        )
        .await
        .expect("Fork failed");
    assert_eq!(fork.forked_at_entry_id, Some(entry_ids[1]));
    assert_eq!(fork.conversation_group_id, parent.conversation_group_id);

    let appended = services
        .entries
        .append("alice", fork.id, AppendRequest::history(vec![history("e4")]))
        .await
        .expect("Append failed");
    let e4 = appended.entries[0].id;

    let texts = |page: EntryPage| -> Vec<String> {
        page.items
            .iter()
            .map(|e| e.content[0]["text"].as_str().unwrap().to_string())
            .collect()
    };

    let fork_view = services
        .entries
        .list("alice", fork.id, EntryReadParams::default())
        .await
        .expect("Read failed");
    assert_eq!(texts(fork_view), vec!["e1", "e2", "e4"]);

    let parent_view = services
        .entries
        .list("alice", parent.id, EntryReadParams::default())
        .await
        .expect("Read failed");
    assert_eq!(texts(parent_view), vec!["e1", "e2", "e3"]);

    let all_forks = services
        .entries
        .list(
            "alice",
            fork.id,
            EntryReadParams {
                all_forks: true,
                ..Default::default()
            },
        )
        .await
        .expect("Read failed");
    let ids: Vec<Uuid> = all_forks.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![entry_ids[0], entry_ids[1], entry_ids[2], e4]);

    let forks = services
        .conversations
        .list_forks("alice", parent.id)
        .await
        .expect("List forks failed");
    assert_eq!(forks.len(), 2);
}

#[tokio::test]
async fn test_fork_at_first_entry_stores_null() {
    let (services, _db) = setup().await;
    let parent = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    let first = services
        .entries
        .append("alice", parent.id, AppendRequest::history(vec![history("e1")]))
        .await
        .expect("Append failed");

    let fork = services
        .conversations
        .create(
            "alice",
            CreateConversation {
                forked_at_conversation_id: Some(parent.id),
                forked_at_entry_id: Some(first.entries[0].id),
                ..Default::default()
            },
        )
        .await
        .expect("Fork failed");
    assert!(fork.forked_at_entry_id.is_none());

    // The fork sees none of the parent's history.
    let view = services
        .entries
        .list("alice", fork.id, EntryReadParams::default())
        .await
        .expect("Read failed");
    assert!(view.items.is_empty());
}

#[tokio::test]
async fn test_fork_rejects_entry_from_other_group() {
    let (services, _db) = setup().await;
    let parent = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    let foreign = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    let foreign_entry = services
        .entries
        .append("alice", foreign.id, AppendRequest::history(vec![history("x")]))
        .await
        .expect("Append failed");

    let result = services
        .conversations
        .create(
            "alice",
            CreateConversation {
                forked_at_conversation_id: Some(parent.id),
                forked_at_entry_id: Some(foreign_entry.entries[0].id),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

// ============================================================================
// Append
// ============================================================================

#[tokio::test]
async fn test_append_auto_creates_with_title() {
    let (services, db) = setup().await;
    let conversation_id = Uuid::new_v4();

    let result = services
        .entries
        .append(
            "alice",
            conversation_id,
            AppendRequest::history(vec![history(
                "What   is the airspeed velocity of an unladen swallow?",
            )]),
        )
        .await
        .expect("Append failed");
    assert!(result.created_conversation);

    let detail = services
        .conversations
        .get("alice", conversation_id)
        .await
        .expect("Get failed");
    assert_eq!(detail.access_level, AccessLevel::Owner);
    assert_eq!(
        detail.title.as_deref(),
        Some("What is the airspeed velocity of an unl")
    );

    // Title is ciphertext at rest.
    let stored = db
        .conversations()
        .get(conversation_id, false)
        .await
        .expect("Get failed")
        .expect("Should exist");
    let raw = stored.title.expect("Title should be stored");
    assert_ne!(raw, detail.title.unwrap().into_bytes());
}

#[tokio::test]
async fn test_append_batch_shares_created_at() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();

    let result = services
        .entries
        .append(
            "alice",
            conversation_id,
            AppendRequest::history(vec![history("a"), history("b"), history("c")]),
        )
        .await
        .expect("Append failed");

    let stamps: Vec<_> = result.entries.iter().map(|e| e.created_at).collect();
    assert!(stamps.windows(2).all(|w| w[0] == w[1]));

    // Read order matches insertion order despite the shared timestamp.
    let view = services
        .entries
        .list("alice", conversation_id, EntryReadParams::default())
        .await
        .expect("Read failed");
    let texts: Vec<&str> = view
        .items
        .iter()
        .map(|e| e.content[0]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_append_is_all_or_nothing() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();

    let result = services
        .entries
        .append(
            "alice",
            conversation_id,
            AppendRequest::history(vec![
                history("fine"),
                AppendEntry {
                    channel: Channel::History,
                    content_type: "history".to_string(),
                    content: vec![json!({"bad": true})],
                    epoch: None,
                    indexed_content: None,
                },
            ]),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    // Validation happens before anything is written, so not even the
    // conversation exists.
    let get = services.conversations.get("alice", conversation_id).await;
    assert!(matches!(get, Err(ServiceError::NotFound)));
}

#[tokio::test]
async fn test_entry_pagination() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();
    let entries: Vec<AppendEntry> = (0..5).map(|i| history(&format!("m{}", i))).collect();
    services
        .entries
        .append("alice", conversation_id, AppendRequest::history(entries))
        .await
        .expect("Append failed");

    let first = services
        .entries
        .list(
            "alice",
            conversation_id,
            EntryReadParams {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .expect("Read failed");
    assert_eq!(first.items.len(), 2);
    let cursor = first.next_cursor.expect("Cursor expected");

    let rest = services
        .entries
        .list(
            "alice",
            conversation_id,
            EntryReadParams {
                cursor: Some(cursor),
                ..Default::default()
            },
        )
        .await
        .expect("Read failed");
    assert_eq!(rest.items.len(), 3);
    assert!(rest.next_cursor.is_none());

    let texts: Vec<&str> = first
        .items
        .iter()
        .chain(rest.items.iter())
        .map(|e| e.content[0]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
}

// ============================================================================
// Access control
// ============================================================================

#[tokio::test]
async fn test_access_control_ladder() {
    let (services, _db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");

    // No membership: reads are forbidden.
    let get = services.conversations.get("bob", conversation.id).await;
    assert!(matches!(get, Err(ServiceError::Forbidden)));

    // READER can read but not write.
    services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Reader)
        .await
        .expect("Share failed");
    services
        .conversations
        .get("bob", conversation.id)
        .await
        .expect("Reader should read");
    let append = services
        .entries
        .append(
            "bob",
            conversation.id,
            AppendRequest::history(vec![history("hi")]),
        )
        .await;
    assert!(matches!(append, Err(ServiceError::Forbidden)));

    // WRITER can append but not delete.
    services
        .memberships
        .update_member("alice", conversation.id, "bob", AccessLevel::Writer)
        .await
        .expect("Update failed");
    services
        .entries
        .append(
            "bob",
            conversation.id,
            AppendRequest::history(vec![history("hi")]),
        )
        .await
        .expect("Writer should append");
    let delete = services.conversations.delete("bob", conversation.id).await;
    assert!(matches!(delete, Err(ServiceError::Forbidden)));
}

#[tokio::test]
async fn test_share_validations() {
    let (services, _db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");

    let owner_share = services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Owner)
        .await;
    assert!(matches!(owner_share, Err(ServiceError::Validation(_))));

    services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Reader)
        .await
        .expect("Share failed");
    let duplicate = services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Writer)
        .await;
    assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));

    let remove_owner = services
        .memberships
        .remove_member("alice", conversation.id, "alice")
        .await;
    assert!(matches!(remove_owner, Err(ServiceError::Validation(_))));

    // A non-manager member can still leave on their own.
    services
        .memberships
        .remove_member("bob", conversation.id, "bob")
        .await
        .expect("Self-removal failed");
    let get = services.conversations.get("bob", conversation.id).await;
    assert!(matches!(get, Err(ServiceError::Forbidden)));
}

// ============================================================================
// Ownership transfer
// ============================================================================

#[tokio::test]
async fn test_ownership_transfer_lifecycle() {
    let (services, db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Writer)
        .await
        .expect("Share failed");
    services
        .memberships
        .share("alice", conversation.id, "carol", AccessLevel::Reader)
        .await
        .expect("Share failed");

    services
        .transfers
        .create("alice", conversation.id, "bob")
        .await
        .expect("Transfer create failed");

    // One pending transfer per group.
    let duplicate = services.transfers.create("alice", conversation.id, "carol").await;
    assert!(matches!(duplicate, Err(ServiceError::Conflict(_))));

    // Only the target may accept.
    let wrong_user = services.transfers.accept("carol", conversation.id).await;
    assert!(matches!(wrong_user, Err(ServiceError::Forbidden)));

    services
        .transfers
        .accept("bob", conversation.id)
        .await
        .expect("Accept failed");

    let members = services
        .memberships
        .list_members("bob", conversation.id)
        .await
        .expect("List failed");
    let owners: Vec<_> = members
        .iter()
        .filter(|m| m.access_level == AccessLevel::Owner)
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].user_id, "bob");
    assert_eq!(
        members
            .iter()
            .find(|m| m.user_id == "alice")
            .unwrap()
            .access_level,
        AccessLevel::Manager
    );

    let stored = db
        .conversations()
        .get(conversation.id, false)
        .await
        .expect("Get failed")
        .expect("Should exist");
    assert_eq!(stored.owner_user_id, "bob");
    assert!(
        services
            .transfers
            .get("bob", conversation.id)
            .await
            .expect("Get failed")
            .is_none()
    );
}

#[tokio::test]
async fn test_transfer_validations() {
    let (services, _db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");

    let to_self = services.transfers.create("alice", conversation.id, "alice").await;
    assert!(matches!(to_self, Err(ServiceError::Validation(_))));

    let to_stranger = services.transfers.create("alice", conversation.id, "ghost").await;
    assert!(matches!(to_stranger, Err(ServiceError::Validation(_))));

    services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Manager)
        .await
        .expect("Share failed");
    let non_owner = services.transfers.create("bob", conversation.id, "alice").await;
    assert!(matches!(non_owner, Err(ServiceError::Forbidden)));
}

// ============================================================================
// Delete / restore
// ============================================================================

#[tokio::test]
async fn test_delete_and_admin_restore() {
    let (services, _db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Reader)
        .await
        .expect("Share failed");
    services
        .entries
        .append(
            "alice",
            conversation.id,
            AppendRequest::history(vec![history("keep me")]),
        )
        .await
        .expect("Append failed");

    services
        .conversations
        .delete("alice", conversation.id)
        .await
        .expect("Delete failed");

    // Nobody reads during the retention window, owner included.
    for user in ["alice", "bob"] {
        let result = services.conversations.get(user, conversation.id).await;
        assert!(matches!(
            result,
            Err(ServiceError::NotFound | ServiceError::Forbidden)
        ));
    }
    let listed = services
        .conversations
        .list("alice", ListMode::All, None, None)
        .await
        .expect("List failed");
    assert!(listed.items.is_empty());

    // The admin trash view still sees it.
    let trash = services
        .admin
        .list(true, false, None, None)
        .await
        .expect("Admin list failed");
    assert!(trash.items.iter().any(|c| c.id == conversation.id));

    services
        .admin
        .restore(conversation.id)
        .await
        .expect("Restore failed");

    // The owner is back; revoked members are not.
    let detail = services
        .conversations
        .get("alice", conversation.id)
        .await
        .expect("Owner should read after restore");
    assert_eq!(detail.access_level, AccessLevel::Owner);
    let bob = services.conversations.get("bob", conversation.id).await;
    assert!(matches!(bob, Err(ServiceError::Forbidden)));

    // Entries survived the soft-delete window.
    let view = services
        .entries
        .list("alice", conversation.id, EntryReadParams::default())
        .await
        .expect("Read failed");
    assert_eq!(view.items.len(), 1);

    services
        .memberships
        .share("alice", conversation.id, "bob", AccessLevel::Reader)
        .await
        .expect("Re-share failed");
    services
        .conversations
        .get("bob", conversation.id)
        .await
        .expect("Bob should read after re-share");
}

#[tokio::test]
async fn test_restore_live_conversation_conflicts() {
    let (services, _db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    let result = services.admin.restore(conversation.id).await;
    assert!(matches!(result, Err(ServiceError::Conflict(_))));
}

// ============================================================================
// Conversation CRUD / listing
// ============================================================================

#[tokio::test]
async fn test_update_title_round_trips_through_crypto() {
    let (services, db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");

    let updated = services
        .conversations
        .update(
            "alice",
            conversation.id,
            UpdateConversation {
                title: Some("Quarterly planning".to_string()),
                metadata: Some(
                    [("pinned".to_string(), "true".to_string())].into_iter().collect(),
                ),
            },
        )
        .await
        .expect("Update failed");
    assert_eq!(updated.title.as_deref(), Some("Quarterly planning"));
    assert_eq!(updated.metadata.get("pinned").map(String::as_str), Some("true"));

    let stored = db
        .conversations()
        .get(conversation.id, false)
        .await
        .expect("Get failed")
        .expect("Should exist");
    assert_ne!(
        stored.title.as_deref(),
        Some("Quarterly planning".as_bytes())
    );
}

#[tokio::test]
async fn test_list_latest_fork_mode() {
    let (services, _db) = setup().await;
    let parent = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    let fork = services
        .conversations
        .create(
            "alice",
            CreateConversation {
                forked_at_conversation_id: Some(parent.id),
                ..Default::default()
            },
        )
        .await
        .expect("Fork failed");

    // A history append makes the fork the group's most recent activity.
    // Step past the creation millisecond so the updated_at comparison is
    // unambiguous.
    tokio::time::sleep(Duration::from_millis(5)).await;
    services
        .entries
        .append("alice", fork.id, AppendRequest::history(vec![history("hi")]))
        .await
        .expect("Append failed");

    let latest = services
        .conversations
        .list("alice", ListMode::LatestFork, None, None)
        .await
        .expect("List failed");
    assert_eq!(latest.items.len(), 1);
    assert_eq!(latest.items[0].id, fork.id);

    let roots = services
        .conversations
        .list("alice", ListMode::Roots, None, None)
        .await
        .expect("List failed");
    assert_eq!(roots.items.len(), 1);
    assert_eq!(roots.items[0].id, parent.id);

    let all = services
        .conversations
        .list("alice", ListMode::All, None, None)
        .await
        .expect("List failed");
    assert_eq!(all.items.len(), 2);
}

// ============================================================================
// Indexing and search
// ============================================================================

#[tokio::test]
async fn test_indexing_lifecycle() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();
    let appended = services
        .entries
        .append(
            "alice",
            conversation_id,
            AppendRequest::history(vec![history("the borrow checker is strict")]),
        )
        .await
        .expect("Append failed");
    let entry = &appended.entries[0];

    let unindexed = services
        .indexing
        .list_unindexed_entries(10, None)
        .await
        .expect("List failed");
    assert!(unindexed.iter().any(|e| e.id == entry.id));

    let indexed = services
        .indexing
        .index_entries(&[crate::models::IndexEntryRequest {
            entry_id: entry.id,
            conversation_id,
            indexed_content: "the borrow checker is strict".to_string(),
        }])
        .await
        .expect("Index failed");
    assert_eq!(indexed, 1);

    let pending = services
        .indexing
        .find_entries_pending_vector_indexing(10)
        .await
        .expect("List failed");
    assert!(pending.iter().any(|e| e.id == entry.id));

    let marked = services
        .indexing
        .set_indexed_at(entry.id, entry.conversation_group_id, Utc::now())
        .await
        .expect("Set failed");
    assert!(marked);
    let pending_after = services
        .indexing
        .find_entries_pending_vector_indexing(10)
        .await
        .expect("List failed");
    assert!(!pending_after.iter().any(|e| e.id == entry.id));

    // Membership-scoped search: alice finds it, bob does not.
    let mine = services
        .entries
        .search("alice", "borrow", None)
        .await
        .expect("Search failed");
    assert_eq!(mine.len(), 1);
    let theirs = services
        .entries
        .search("bob", "borrow", None)
        .await
        .expect("Search failed");
    assert!(theirs.is_empty());

    // The admin variant is unrestricted.
    let admin = services
        .admin
        .search_entries("borrow", None)
        .await
        .expect("Search failed");
    assert_eq!(admin.len(), 1);
}

#[tokio::test]
async fn test_index_requests_outside_group_are_skipped() {
    let (services, _db) = setup().await;
    let mine = Uuid::new_v4();
    let theirs = Uuid::new_v4();
    let my_entry = services
        .entries
        .append("alice", mine, AppendRequest::history(vec![history("a")]))
        .await
        .expect("Append failed");
    services
        .entries
        .append("bob", theirs, AppendRequest::history(vec![history("b")]))
        .await
        .expect("Append failed");

    // Entry from alice's group attributed to bob's conversation: no match.
    let indexed = services
        .indexing
        .index_entries(&[crate::models::IndexEntryRequest {
            entry_id: my_entry.entries[0].id,
            conversation_id: theirs,
            indexed_content: "text".to_string(),
        }])
        .await
        .expect("Index failed");
    assert_eq!(indexed, 0);
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test]
async fn test_eviction_reclaims_deleted_groups() {
    let (services, db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    services
        .entries
        .append(
            "alice",
            conversation.id,
            AppendRequest::history(vec![history("doomed")]),
        )
        .await
        .expect("Append failed");

    // Soft-delete far enough in the past to clear the retention window.
    db.conversations()
        .soft_delete_group(
            conversation.conversation_group_id,
            Utc::now() - chrono::Duration::days(60),
        )
        .await
        .expect("Delete failed");

    let config = RetentionConfig {
        retention_days: 30,
        ..Default::default()
    };
    let result = crate::retention::run_eviction(&db, &config)
        .await
        .expect("Eviction failed");
    assert_eq!(result.groups_deleted, 1);
    assert_eq!(result.cleanup_tasks_enqueued, 1);

    assert!(
        db.conversations()
            .get(conversation.id, true)
            .await
            .expect("Get failed")
            .is_none()
    );

    // The vector cleanup task is queued as a singleton per group.
    let task = db
        .tasks()
        .get_by_name(&format!(
            "vector_store_cleanup:{}",
            conversation.conversation_group_id
        ))
        .await
        .expect("Get failed");
    assert!(task.is_some());

    // Re-running is a no-op.
    let again = crate::retention::run_eviction(&db, &config)
        .await
        .expect("Eviction failed");
    assert_eq!(again.groups_deleted, 0);
}

// ============================================================================
// Attachments
// ============================================================================

#[tokio::test]
async fn test_attachment_lifecycle() {
    let (services, _db) = setup().await;
    let conversation_id = Uuid::new_v4();
    let appended = services
        .entries
        .append(
            "alice",
            conversation_id,
            AppendRequest::history(vec![history("see attached")]),
        )
        .await
        .expect("Append failed");
    let entry_id = appended.entries[0].id;

    // Unlinked upload carries a TTL.
    let upload = services
        .attachments
        .create(
            "alice",
            crate::models::CreateAttachment {
                entry_id: None,
                file_name: "report.pdf".to_string(),
                media_type: "application/pdf".to_string(),
                size_bytes: 2048,
            },
        )
        .await
        .expect("Create failed");
    assert!(upload.expires_at.is_some());

    // Linking clears the TTL and scopes it to the entry's group.
    services
        .attachments
        .link("alice", upload.id, entry_id)
        .await
        .expect("Link failed");
    let linked = services
        .attachments
        .get("alice", upload.id)
        .await
        .expect("Get failed");
    assert!(linked.expires_at.is_none());
    assert_eq!(linked.entry_id, Some(entry_id));

    // Non-members cannot see it; group readers can.
    let stranger = services.attachments.get("bob", upload.id).await;
    assert!(matches!(stranger, Err(ServiceError::Forbidden)));
    services
        .memberships
        .share("alice", conversation_id, "bob", AccessLevel::Reader)
        .await
        .expect("Share failed");
    services
        .attachments
        .get("bob", upload.id)
        .await
        .expect("Reader should see the attachment");
    let listed = services
        .attachments
        .list_by_entry("bob", entry_id)
        .await
        .expect("List failed");
    assert_eq!(listed.len(), 1);

    services
        .attachments
        .delete("alice", upload.id)
        .await
        .expect("Delete failed");
    let gone = services.attachments.get("alice", upload.id).await;
    assert!(matches!(gone, Err(ServiceError::NotFound)));
}

#[tokio::test]
async fn test_eviction_dry_run_deletes_nothing() {
    let (services, db) = setup().await;
    let conversation = services
        .conversations
        .create("alice", CreateConversation::default())
        .await
        .expect("Create failed");
    db.conversations()
        .soft_delete_group(
            conversation.conversation_group_id,
            Utc::now() - chrono::Duration::days(60),
        )
        .await
        .expect("Delete failed");

    let config = RetentionConfig {
        retention_days: 30,
        dry_run: true,
        ..Default::default()
    };
    crate::retention::run_eviction(&db, &config)
        .await
        .expect("Eviction failed");

    assert!(
        db.conversations()
            .get(conversation.id, true)
            .await
            .expect("Get failed")
            .is_some()
    );
}
