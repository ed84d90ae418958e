mod attachments;
mod common;
mod conversations;
mod entries;
mod memberships;
mod tasks;
mod transfers;

pub use attachments::PostgresAttachmentRepo;
pub use conversations::PostgresConversationRepo;
pub use entries::PostgresEntryRepo;
pub use memberships::PostgresMembershipRepo;
pub use tasks::PostgresTaskRepo;
pub use transfers::PostgresTransferRepo;
