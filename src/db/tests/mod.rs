//! Shared database repository test infrastructure
//!
//! This module provides a test harness for running the same test logic
//! against both SQLite and PostgreSQL implementations. Tests are
//! organized as:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: Slower tests using testcontainers, run with `cargo test -- --ignored`
//!
//! # Architecture
//!
//! Each repository has a test module (e.g., `conversations.rs`) containing:
//! - Shared test functions that take a `&DbPool` (seeding often spans repos)
//! - SQLite-specific setup using in-memory databases
//! - PostgreSQL-specific setup using testcontainers (marked `#[ignore]`)
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```

mod entries;
mod transfers;

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::{DbPool, NewConversation, cursor::truncate_to_millis},
    models::{Channel, Conversation, Entry},
};

/// Seed a root conversation (its group and OWNER membership included).
pub async fn seed_root(db: &DbPool, owner: &str) -> Conversation {
    db.conversations()
        .create_root(NewConversation {
            id: Uuid::new_v4(),
            owner_user_id: owner.to_string(),
            title: None,
            metadata: HashMap::new(),
            conversation_group_id: Uuid::new_v4(),
            forked_at_conversation_id: None,
            forked_at_entry_id: None,
        })
        .await
        .expect("Failed to seed root conversation")
}

/// Seed a fork of `parent` sharing its group.
pub async fn seed_fork(
    db: &DbPool,
    parent: &Conversation,
    forked_at_entry_id: Option<Uuid>,
) -> Conversation {
    db.conversations()
        .create_fork(NewConversation {
            id: Uuid::new_v4(),
            owner_user_id: parent.owner_user_id.clone(),
            title: None,
            metadata: HashMap::new(),
            conversation_group_id: parent.conversation_group_id,
            forked_at_conversation_id: Some(parent.id),
            forked_at_entry_id,
        })
        .await
        .expect("Failed to seed fork")
}

/// Build an unsaved history entry row for a conversation.
pub fn history_entry(conversation: &Conversation, text: &str) -> Entry {
    Entry {
        id: Uuid::now_v7(),
        conversation_id: conversation.id,
        conversation_group_id: conversation.conversation_group_id,
        user_id: Some(conversation.owner_user_id.clone()),
        client_id: None,
        channel: Channel::History,
        epoch: None,
        content_type: "history".to_string(),
        content: format!("[{{\"text\":\"{}\",\"role\":\"USER\"}}]", text).into_bytes(),
        indexed_content: None,
        indexed_at: None,
        created_at: truncate_to_millis(Utc::now()),
    }
}

/// Build an unsaved memory entry row for a conversation.
pub fn memory_entry(conversation: &Conversation, client_id: &str, epoch: i64) -> Entry {
    Entry {
        id: Uuid::now_v7(),
        conversation_id: conversation.id,
        conversation_group_id: conversation.conversation_group_id,
        user_id: Some(conversation.owner_user_id.clone()),
        client_id: Some(client_id.to_string()),
        channel: Channel::Memory,
        epoch: Some(epoch),
        content_type: "memory".to_string(),
        content: format!("[{{\"epoch\":{}}}]", epoch).into_bytes(),
        indexed_content: None,
        indexed_at: None,
        created_at: truncate_to_millis(Utc::now()),
    }
}
