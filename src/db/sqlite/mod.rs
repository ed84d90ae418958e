mod attachments;
mod common;
mod conversations;
mod entries;
mod memberships;
mod tasks;
mod transfers;

pub use attachments::SqliteAttachmentRepo;
pub use conversations::SqliteConversationRepo;
pub use entries::SqliteEntryRepo;
pub use memberships::SqliteMembershipRepo;
pub use tasks::SqliteTaskRepo;
pub use transfers::SqliteTransferRepo;
