//! Shared tests for TransferRepo implementations

use chrono::Utc;
use uuid::Uuid;

use super::{seed_fork, seed_root};
use crate::{
    db::{DbError, DbPool},
    models::{AccessLevel, Membership, OwnershipTransfer},
};

fn transfer(group_id: Uuid, from: &str, to: &str) -> OwnershipTransfer {
    OwnershipTransfer {
        id: Uuid::new_v4(),
        conversation_group_id: group_id,
        from_user_id: from.to_string(),
        to_user_id: to.to_string(),
        created_at: Utc::now(),
    }
}

async fn share(db: &DbPool, group_id: Uuid, user: &str, level: AccessLevel) {
    db.memberships()
        .insert(&Membership {
            conversation_group_id: group_id,
            user_id: user.to_string(),
            access_level: level,
            created_at: Utc::now(),
        })
        .await
        .expect("Failed to share");
}

pub async fn test_create_and_get_by_group(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let group_id = conversation.conversation_group_id;
    share(db, group_id, "bob", AccessLevel::Writer).await;

    let created = transfer(group_id, "alice", "bob");
    db.transfers()
        .create(&created)
        .await
        .expect("Failed to create");

    let fetched = db
        .transfers()
        .get_by_group(group_id)
        .await
        .expect("Failed to get")
        .expect("Should exist");
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.from_user_id, "alice");
    assert_eq!(fetched.to_user_id, "bob");
}

pub async fn test_second_transfer_for_group_conflicts(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let group_id = conversation.conversation_group_id;
    share(db, group_id, "bob", AccessLevel::Writer).await;
    share(db, group_id, "carol", AccessLevel::Writer).await;

    db.transfers()
        .create(&transfer(group_id, "alice", "bob"))
        .await
        .expect("Failed to create");

    let result = db.transfers().create(&transfer(group_id, "alice", "carol")).await;
    assert!(matches!(result, Err(DbError::Conflict(_))));
}

pub async fn test_accept_swaps_owner_and_updates_conversations(db: &DbPool) {
    let root = seed_root(db, "alice").await;
    let fork = seed_fork(db, &root, None).await;
    let group_id = root.conversation_group_id;
    share(db, group_id, "bob", AccessLevel::Writer).await;

    let pending = transfer(group_id, "alice", "bob");
    db.transfers()
        .create(&pending)
        .await
        .expect("Failed to create");
    db.transfers()
        .accept(pending.id)
        .await
        .expect("Failed to accept");

    // Exactly one OWNER, and it is bob; alice is now MANAGER.
    let members = db
        .memberships()
        .list_for_group(group_id)
        .await
        .expect("Failed to list");
    let owners: Vec<_> = members
        .iter()
        .filter(|m| m.access_level == AccessLevel::Owner)
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].user_id, "bob");
    let alice = members
        .iter()
        .find(|m| m.user_id == "alice")
        .expect("Alice should remain a member");
    assert_eq!(alice.access_level, AccessLevel::Manager);

    // Every conversation in the group carries the new owner.
    for id in [root.id, fork.id] {
        let conversation = db
            .conversations()
            .get(id, false)
            .await
            .expect("Failed to get")
            .expect("Should exist");
        assert_eq!(conversation.owner_user_id, "bob");
    }

    // The transfer row is gone.
    assert!(
        db.transfers()
            .get_by_group(group_id)
            .await
            .expect("Query should succeed")
            .is_none()
    );
}

pub async fn test_accept_unknown_transfer_is_not_found(db: &DbPool) {
    let result = db.transfers().accept(Uuid::new_v4()).await;
    assert!(matches!(result, Err(DbError::NotFound)));
}

pub async fn test_accept_after_target_left_conflicts(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let group_id = conversation.conversation_group_id;
    share(db, group_id, "bob", AccessLevel::Writer).await;

    let pending = transfer(group_id, "alice", "bob");
    db.transfers()
        .create(&pending)
        .await
        .expect("Failed to create");
    db.memberships()
        .delete(group_id, "bob")
        .await
        .expect("Failed to remove bob");

    let result = db.transfers().accept(pending.id).await;
    assert!(matches!(result, Err(DbError::Conflict(_))));

    // Alice is still the owner.
    let alice = db
        .memberships()
        .get(group_id, "alice")
        .await
        .expect("Failed to get")
        .expect("Should exist");
    assert_eq!(alice.access_level, AccessLevel::Owner);
}

pub async fn test_delete_by_group_target(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let group_id = conversation.conversation_group_id;
    share(db, group_id, "bob", AccessLevel::Writer).await;
    db.transfers()
        .create(&transfer(group_id, "alice", "bob"))
        .await
        .expect("Failed to create");

    let removed = db
        .transfers()
        .delete_by_group_target(group_id, "bob")
        .await
        .expect("Failed to delete");
    assert_eq!(removed, 1);

    let removed_again = db
        .transfers()
        .delete_by_group_target(group_id, "bob")
        .await
        .expect("Failed to delete");
    assert_eq!(removed_again, 0);
}

pub async fn test_delete(db: &DbPool) {
    let conversation = seed_root(db, "alice").await;
    let group_id = conversation.conversation_group_id;
    share(db, group_id, "bob", AccessLevel::Writer).await;

    let pending = transfer(group_id, "alice", "bob");
    db.transfers()
        .create(&pending)
        .await
        .expect("Failed to create");
    db.transfers()
        .delete(pending.id)
        .await
        .expect("Failed to delete");

    let again = db.transfers().delete(pending.id).await;
    assert!(matches!(again, Err(DbError::NotFound)));
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

    sqlite_test!(test_create_and_get_by_group);
    sqlite_test!(test_second_transfer_for_group_conflicts);
    sqlite_test!(test_accept_swaps_owner_and_updates_conversations);
    sqlite_test!(test_accept_unknown_transfer_is_not_found);
    sqlite_test!(test_accept_after_target_left_conflicts);
    sqlite_test!(test_delete_by_group_target);
    sqlite_test!(test_delete);
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

    postgres_test!(test_create_and_get_by_group);
    postgres_test!(test_second_transfer_for_group_conflicts);
    postgres_test!(test_accept_swaps_owner_and_updates_conversations);
    postgres_test!(test_accept_unknown_transfer_is_not_found);
    postgres_test!(test_accept_after_target_left_conflicts);
    postgres_test!(test_delete_by_group_target);
    postgres_test!(test_delete);
}
