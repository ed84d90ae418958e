mod access;
mod admin;
mod attachments;
mod conversations;
mod entries;
mod error;
mod indexing;
mod memberships;
mod memory_sync;
mod transfers;

#[cfg(all(test, feature = "database-sqlite"))]
mod tests;

use std::{sync::Arc, time::Duration};

pub use access::AccessService;
pub use admin::{AdminConversationPage, AdminConversationView, AdminService};
pub use attachments::AttachmentService;
pub use conversations::{ConversationPage, ConversationService};
pub use entries::{EntryPage, EntryReadParams, EntryService};
pub use error::{ServiceError, ServiceResult};
pub use indexing::IndexingService;
pub use memberships::MembershipService;
pub use memory_sync::MemorySyncService;
pub use transfers::TransferService;

use crate::{cache::EntryCache, crypto::ContentCrypto, db::DbPool};

/// Container for all services, constructed once at startup with the
/// selected datastore, crypto and cache backends.
#[derive(Clone)]
pub struct Services {
    pub access: AccessService,
    pub conversations: ConversationService,
    pub entries: EntryService,
    pub memory_sync: MemorySyncService,
    pub memberships: MembershipService,
    pub transfers: TransferService,
    pub indexing: IndexingService,
    pub attachments: AttachmentService,
    pub admin: AdminService,
}

impl Services {
    pub fn new(
        db: Arc<DbPool>,
        crypto: Arc<ContentCrypto>,
        cache: Arc<dyn EntryCache>,
        cache_ttl: Duration,
    ) -> Self {
        let access = AccessService::new(db.clone());
        let conversations =
            ConversationService::new(db.clone(), crypto.clone(), access.clone());
        let entries = EntryService::new(
            db.clone(),
            crypto.clone(),
            access.clone(),
            conversations.clone(),
            cache.clone(),
            cache_ttl,
        );
        let memory_sync =
            MemorySyncService::new(db.clone(), crypto.clone(), entries.clone(), cache);

        Self {
            memberships: MembershipService::new(db.clone(), access.clone()),
            transfers: TransferService::new(db.clone(), access.clone()),
            indexing: IndexingService::new(db.clone(), entries.clone()),
            attachments: AttachmentService::new(db.clone(), access.clone()),
            admin: AdminService::new(db, crypto),
            access,
            conversations,
            entries,
            memory_sync,
        }
    }
}
