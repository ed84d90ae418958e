//! Shared tests for EntryRepo implementations

use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{history_entry, memory_entry, seed_root};
use crate::{
    db::{DbError, DbPool, cursor::truncate_to_millis},
    models::Channel,
};

// ============================================================================
// Insert / Get / List Tests
// ============================================================================

pub async fn test_insert_batch_and_get(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let entry = history_entry(&conversation, "hello");
    db.entries()
        .insert_batch(std::slice::from_ref(&entry))
        .await
        .expect("Failed to insert");

    let fetched = db
        .entries()
        .get(entry.id)
        .await
        .expect("Failed to get")
        .expect("Should exist");
    assert_eq!(fetched.conversation_id, conversation.id);
    assert_eq!(fetched.channel, Channel::History);
    assert_eq!(fetched.content, entry.content);
    assert!(fetched.epoch.is_none());
    assert!(fetched.indexed_at.is_none());
}

pub async fn test_insert_empty_batch_is_noop(db: &DbPool) {
    db.entries()
        .insert_batch(&[])
        .await
        .expect("Empty batch should succeed");
}

pub async fn test_list_group_entries_ordering(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let mut batch = Vec::new();
    for i in 0..4 {
        let mut entry = history_entry(&conversation, &format!("m{}", i));
        entry.created_at = truncate_to_millis(Utc::now()) + Duration::milliseconds(i);
        batch.push(entry);
    }
    db.entries()
        .insert_batch(&batch)
        .await
        .expect("Failed to insert");

    let listed = db
        .entries()
        .list_group_entries(conversation.conversation_group_id, None, None)
        .await
        .expect("Failed to list");
    let ids: Vec<Uuid> = listed.iter().map(|e| e.id).collect();
    let expected: Vec<Uuid> = batch.iter().map(|e| e.id).collect();
    assert_eq!(ids, expected);
}

pub async fn test_list_group_entries_same_timestamp_ties_on_id(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let shared = truncate_to_millis(Utc::now());
    let mut batch = Vec::new();
    for i in 0..3 {
        let mut entry = history_entry(&conversation, &format!("m{}", i));
        entry.created_at = shared;
        batch.push(entry);
    }
    // With equal timestamps the store must order by id.
    batch.sort_by_key(|e| e.id);
    db.entries()
        .insert_batch(&batch)
        .await
        .expect("Failed to insert");

    let listed = db
        .entries()
        .list_group_entries(conversation.conversation_group_id, None, None)
        .await
        .expect("Failed to list");
    let ids: Vec<Uuid> = listed.iter().map(|e| e.id).collect();
    let expected: Vec<Uuid> = batch.iter().map(|e| e.id).collect();
    assert_eq!(ids, expected);
}

pub async fn test_list_group_entries_channel_and_client_filters(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let history = history_entry(&conversation, "hi");
    let mem_a = memory_entry(&conversation, "client-a", 1);
    let mem_b = memory_entry(&conversation, "client-b", 1);
    db.entries()
        .insert_batch(&[history.clone(), mem_a.clone(), mem_b.clone()])
        .await
        .expect("Failed to insert");

    let history_only = db
        .entries()
        .list_group_entries(
            conversation.conversation_group_id,
            Some(Channel::History),
            None,
        )
        .await
        .expect("Failed to list");
    assert_eq!(history_only.len(), 1);
    assert_eq!(history_only[0].id, history.id);

    let client_a = db
        .entries()
        .list_group_entries(
            conversation.conversation_group_id,
            Some(Channel::Memory),
            Some("client-a"),
        )
        .await
        .expect("Failed to list");
    assert_eq!(client_a.len(), 1);
    assert_eq!(client_a[0].id, mem_a.id);
}

// ============================================================================
// Fork Predecessor Tests
// ============================================================================

pub async fn test_history_predecessor(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let mut batch = Vec::new();
    for i in 0..3 {
        let mut entry = history_entry(&conversation, &format!("m{}", i));
        entry.created_at = truncate_to_millis(Utc::now()) + Duration::milliseconds(i);
        batch.push(entry);
    }
    db.entries()
        .insert_batch(&batch)
        .await
        .expect("Failed to insert");

    // First entry has no predecessor.
    assert!(
        db.entries()
            .history_predecessor(conversation.id, batch[0].id)
            .await
            .expect("Query should succeed")
            .is_none()
    );
    assert_eq!(
        db.entries()
            .history_predecessor(conversation.id, batch[2].id)
            .await
            .expect("Query should succeed"),
        Some(batch[1].id)
    );
}

pub async fn test_history_predecessor_unknown_entry(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let result = db
        .entries()
        .history_predecessor(conversation.id, Uuid::now_v7())
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

pub async fn test_history_predecessor_ignores_memory_entries(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let mem = memory_entry(&conversation, "c1", 1);
    db.entries()
        .insert_batch(std::slice::from_ref(&mem))
        .await
        .expect("Failed to insert");

    let result = db
        .entries()
        .history_predecessor(conversation.id, mem.id)
        .await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

// ============================================================================
// Indexing Lifecycle Tests
// ============================================================================

pub async fn test_list_unindexed_and_set_indexed_content(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let entry = history_entry(&conversation, "needle");
    db.entries()
        .insert_batch(std::slice::from_ref(&entry))
        .await
        .expect("Failed to insert");

    let unindexed = db
        .entries()
        .list_unindexed(10, None)
        .await
        .expect("Failed to list");
    assert!(unindexed.iter().any(|e| e.id == entry.id));

    let matched = db
        .entries()
        .set_indexed_content(entry.id, conversation.conversation_group_id, "needle text")
        .await
        .expect("Failed to set");
    assert!(matched);

    let unindexed_after = db
        .entries()
        .list_unindexed(10, None)
        .await
        .expect("Failed to list");
    assert!(!unindexed_after.iter().any(|e| e.id == entry.id));
}

pub async fn test_set_indexed_content_rejects_wrong_group(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let other = seed_root(db, "bob").await;
    let entry = history_entry(&conversation, "hi");
    db.entries()
        .insert_batch(std::slice::from_ref(&entry))
        .await
        .expect("Failed to insert");

    let matched = db
        .entries()
        .set_indexed_content(entry.id, other.conversation_group_id, "text")
        .await
        .expect("Query should succeed");
    assert!(!matched);
}

pub async fn test_set_indexed_content_rejects_memory_entries(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let entry = memory_entry(&conversation, "c1", 1);
    db.entries()
        .insert_batch(std::slice::from_ref(&entry))
        .await
        .expect("Failed to insert");

    let matched = db
        .entries()
        .set_indexed_content(entry.id, conversation.conversation_group_id, "text")
        .await
        .expect("Query should succeed");
    assert!(!matched);
}

pub async fn test_pending_vector_indexing_and_set_indexed_at(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let entry = history_entry(&conversation, "hi");
    db.entries()
        .insert_batch(std::slice::from_ref(&entry))
        .await
        .expect("Failed to insert");
    db.entries()
        .set_indexed_content(entry.id, conversation.conversation_group_id, "hi there")
        .await
        .expect("Failed to set");

    let pending = db
        .entries()
        .find_pending_vector_indexing(10)
        .await
        .expect("Failed to list");
    assert!(pending.iter().any(|e| e.id == entry.id));

    let matched = db
        .entries()
        .set_indexed_at(entry.id, conversation.conversation_group_id, Utc::now())
        .await
        .expect("Failed to set");
    assert!(matched);

    let pending_after = db
        .entries()
        .find_pending_vector_indexing(10)
        .await
        .expect("Failed to list");
    assert!(!pending_after.iter().any(|e| e.id == entry.id));
}

pub async fn test_search_indexed_content_scoping(db: &DbPool) {
    let mine = seed_root(db, "alice").await;
    let theirs = seed_root(db, "bob").await;

    for (conversation, text) in [(&mine, "rust borrow checker"), (&theirs, "rust lifetimes")] {
        let entry = history_entry(conversation, "q");
        db.entries()
            .insert_batch(std::slice::from_ref(&entry))
            .await
            .expect("Failed to insert");
        db.entries()
            .set_indexed_content(entry.id, conversation.conversation_group_id, text)
            .await
            .expect("Failed to set");
    }

    let scoped = db
        .entries()
        .search_indexed_content("rust", Some(&[mine.conversation_group_id]), 10)
        .await
        .expect("Failed to search");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].conversation_group_id, mine.conversation_group_id);

    let unrestricted = db
        .entries()
        .search_indexed_content("rust", None, 10)
        .await
        .expect("Failed to search");
    assert_eq!(unrestricted.len(), 2);

    let miss = db
        .entries()
        .search_indexed_content("nonexistent", None, 10)
        .await
        .expect("Failed to search");
    assert!(miss.is_empty());
}

pub async fn test_search_escapes_like_wildcards(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let entry = history_entry(&conversation, "q");
    db.entries()
        .insert_batch(std::slice::from_ref(&entry))
        .await
        .expect("Failed to insert");
    db.entries()
        .set_indexed_content(entry.id, conversation.conversation_group_id, "50% done")
        .await
        .expect("Failed to set");

    let hit = db
        .entries()
        .search_indexed_content("50%", None, 10)
        .await
        .expect("Failed to search");
    assert_eq!(hit.len(), 1);

    // A bare wildcard must not match everything.
    let wildcard = db
        .entries()
        .search_indexed_content("%", None, 10)
        .await
        .expect("Failed to search");
    assert_eq!(wildcard.len(), 1);
}

// ============================================================================
// Epoch Eviction Tests
// ============================================================================

pub async fn test_find_superseded_epochs(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let old = truncate_to_millis(Utc::now() - Duration::days(60));

    let mut epoch1 = memory_entry(&conversation, "c1", 1);
    epoch1.created_at = old;
    let mut epoch2 = memory_entry(&conversation, "c1", 2);
    epoch2.created_at = old + Duration::seconds(1);
    // The latest epoch is recent and must never be reported.
    let epoch3 = memory_entry(&conversation, "c1", 3);
    db.entries()
        .insert_batch(&[epoch1, epoch2, epoch3])
        .await
        .expect("Failed to insert");

    let cutoff = Utc::now() - Duration::days(30);
    let superseded = db
        .entries()
        .find_superseded_epochs(cutoff, 10)
        .await
        .expect("Failed to find superseded epochs");

    let epochs: Vec<i64> = superseded
        .iter()
        .filter(|s| s.conversation_id == conversation.id && s.client_id == "c1")
        .map(|s| s.epoch)
        .collect();
    assert_eq!(epochs, vec![1, 2]);
}

pub async fn test_find_superseded_epochs_skips_recent(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    db.entries()
        .insert_batch(&[
            memory_entry(&conversation, "c1", 1),
            memory_entry(&conversation, "c1", 2),
        ])
        .await
        .expect("Failed to insert");

    let cutoff = Utc::now() - Duration::days(30);
    let superseded = db
        .entries()
        .find_superseded_epochs(cutoff, 10)
        .await
        .expect("Failed to find superseded epochs");
    assert!(
        superseded
            .iter()
            .all(|s| s.conversation_id != conversation.id)
    );
}

pub async fn test_delete_epoch_returns_entry_ids(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let a = memory_entry(&conversation, "c1", 1);
    let b = memory_entry(&conversation, "c1", 1);
    let keep = memory_entry(&conversation, "c1", 2);
    db.entries()
        .insert_batch(&[a.clone(), b.clone(), keep.clone()])
        .await
        .expect("Failed to insert");

    let deleted = db
        .entries()
        .delete_epoch(conversation.id, "c1", 1)
        .await
        .expect("Failed to delete epoch");
    let mut deleted_sorted = deleted.clone();
    deleted_sorted.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(deleted_sorted, expected);

    let remaining = db
        .entries()
        .list_group_entries(
            conversation.conversation_group_id,
            Some(Channel::Memory),
            Some("c1"),
        )
        .await
        .expect("Failed to list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep.id);
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use crate::db::tests::harness::create_sqlite_db;

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let db = create_sqlite_db().await;
                super::$name(&db).await;
            }
        };
    }

    sqlite_test!(test_insert_batch_and_get);
    sqlite_test!(test_insert_empty_batch_is_noop);
    sqlite_test!(test_list_group_entries_ordering);
    sqlite_test!(test_list_group_entries_same_timestamp_ties_on_id);
    sqlite_test!(test_list_group_entries_channel_and_client_filters);
    sqlite_test!(test_history_predecessor);
    sqlite_test!(test_history_predecessor_unknown_entry);
    sqlite_test!(test_history_predecessor_ignores_memory_entries);
    sqlite_test!(test_list_unindexed_and_set_indexed_content);
    sqlite_test!(test_set_indexed_content_rejects_wrong_group);
    sqlite_test!(test_set_indexed_content_rejects_memory_entries);
    sqlite_test!(test_pending_vector_indexing_and_set_indexed_at);
    sqlite_test!(test_search_indexed_content_scoping);
    sqlite_test!(test_search_escapes_like_wildcards);
    sqlite_test!(test_find_superseded_epochs);
    sqlite_test!(test_find_superseded_epochs_skips_recent);
    sqlite_test!(test_delete_epoch_returns_entry_ids);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use crate::db::tests::harness::postgres::create_postgres_db;

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let db = create_postgres_db().await;
                super::$name(&db).await;
            }
        };
    }

    postgres_test!(test_insert_batch_and_get);
    postgres_test!(test_insert_empty_batch_is_noop);
    postgres_test!(test_list_group_entries_ordering);
    postgres_test!(test_list_group_entries_same_timestamp_ties_on_id);
    postgres_test!(test_list_group_entries_channel_and_client_filters);
    postgres_test!(test_history_predecessor);
    postgres_test!(test_history_predecessor_unknown_entry);
    postgres_test!(test_history_predecessor_ignores_memory_entries);
    postgres_test!(test_list_unindexed_and_set_indexed_content);
    postgres_test!(test_set_indexed_content_rejects_wrong_group);
    postgres_test!(test_set_indexed_content_rejects_memory_entries);
    postgres_test!(test_pending_vector_indexing_and_set_indexed_at);
    postgres_test!(test_search_indexed_content_scoping);
    postgres_test!(test_search_escapes_like_wildcards);
    postgres_test!(test_find_superseded_epochs);
    postgres_test!(test_find_superseded_epochs_skips_recent);
    postgres_test!(test_delete_epoch_returns_entry_ids);
}
