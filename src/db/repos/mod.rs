mod attachments;
mod conversations;
pub mod cursor;
mod entries;
mod memberships;
mod tasks;
mod transfers;

pub use attachments::*;
pub use conversations::*;
pub use cursor::*;
pub use entries::*;
pub use memberships::*;
pub use tasks::*;
pub use transfers::*;

/// Result of a paginated list query.
#[derive(Debug, Clone)]
pub struct ListResult<T> {
    /// The items returned for this page.
    pub items: Vec<T>,
    /// Whether there are more items after this page.
    pub has_more: bool,
    /// Cursor resuming after the last returned item, present when
    /// `has_more`.
    pub next_cursor: Option<Cursor>,
}

impl<T> ListResult<T> {
    pub fn new(items: Vec<T>, has_more: bool, next_cursor: Option<Cursor>) -> Self {
        Self {
            items,
            has_more,
            next_cursor,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_cursor: None,
        }
    }
}
