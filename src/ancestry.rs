//! Fork ancestry: building the root-to-leaf stack for a conversation and
//! filtering a group's entry stream down to what one fork can see.
//!
//! Forks form a tree inside a group. Each conversation stores its parent id
//! and the last parent entry it shares (`forked_at_entry_id`); the stack is
//! rebuilt per request with an explicit loop, never recursion into row
//! objects.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{Conversation, Entry};

#[derive(Debug, Error)]
pub enum AncestryError {
    #[error("Conversation {0} not found in group")]
    MissingConversation(Uuid),

    #[error("Fork ancestry of conversation {0} contains a cycle")]
    Cycle(Uuid),
}

/// One step of the root-to-leaf ancestry stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestryStep {
    pub conversation_id: Uuid,
    /// Last entry of this ancestor visible to its descendants. `None` on
    /// the leaf (everything visible) and on ancestors forked before their
    /// first entry (nothing visible).
    pub stop_at_entry_id: Option<Uuid>,
}

/// Build the ancestry stack for `target`, root first.
///
/// `conversations` must contain every conversation of the target's group
/// (keyed by id). The walk is bounded by the map size, so a corrupt parent
/// chain surfaces as [`AncestryError::Cycle`] instead of looping.
pub fn build_ancestry(
    conversations: &HashMap<Uuid, Conversation>,
    target: Uuid,
) -> Result<Vec<AncestryStep>, AncestryError> {
    let mut stack = Vec::new();
    let mut current = target;
    let mut stop_at = None;

    loop {
        if stack.len() > conversations.len() {
            return Err(AncestryError::Cycle(target));
        }
        let conversation = conversations
            .get(&current)
            .ok_or(AncestryError::MissingConversation(current))?;

        stack.push(AncestryStep {
            conversation_id: current,
            stop_at_entry_id: stop_at,
        });

        match conversation.forked_at_conversation_id {
            Some(parent) => {
                // The parent's visible prefix ends at the child's fork
                // predecessor.
                stop_at = conversation.forked_at_entry_id;
                current = parent;
            }
            None => break,
        }
    }

    stack.reverse();
    Ok(stack)
}

/// Filter a group's `(created_at, id)`-ordered entry stream to the
/// timeline visible from the conversation the ancestry was built for:
/// each ancestor's prefix up to and including its stop entry, then the
/// leaf's own entries.
pub fn filter_visible<'a>(entries: &'a [Entry], ancestry: &[AncestryStep]) -> Vec<&'a Entry> {
    if ancestry.is_empty() {
        return Vec::new();
    }

    let leaf = ancestry.len() - 1;
    let mut index = 0;
    let mut visible = Vec::new();

    for entry in entries {
        // Ancestors forked before their first entry contribute nothing.
        while index < leaf && ancestry[index].stop_at_entry_id.is_none() {
            index += 1;
        }

        let step = &ancestry[index];
        if entry.conversation_id == step.conversation_id {
            visible.push(entry);
            if step.stop_at_entry_id == Some(entry.id) {
                index += 1;
            }
        }
    }

    visible
}
