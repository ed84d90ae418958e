mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    conversations: Arc<dyn ConversationRepo>,
    memberships: Arc<dyn MembershipRepo>,
    transfers: Arc<dyn TransferRepo>,
    entries: Arc<dyn EntryRepo>,
    attachments: Arc<dyn AttachmentRepo>,
    tasks: Arc<dyn TaskRepo>,
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "database-postgres")]
    Postgres(sqlx::PgPool),
    #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
    _None(std::convert::Infallible),
}

/// Database pool supporting both SQLite and PostgreSQL.
///
/// Repositories are cached at construction time to avoid allocation on
/// each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            conversations: Arc::new(sqlite::SqliteConversationRepo::new(pool.clone())),
            memberships: Arc::new(sqlite::SqliteMembershipRepo::new(pool.clone())),
            transfers: Arc::new(sqlite::SqliteTransferRepo::new(pool.clone())),
            entries: Arc::new(sqlite::SqliteEntryRepo::new(pool.clone())),
            attachments: Arc::new(sqlite::SqliteAttachmentRepo::new(pool.clone())),
            tasks: Arc::new(sqlite::SqliteTaskRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a DbPool from an existing PostgreSQL pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-postgres")]
    pub fn from_postgres(pool: sqlx::PgPool) -> Self {
        let repos = CachedRepos {
            conversations: Arc::new(postgres::PostgresConversationRepo::new(pool.clone())),
            memberships: Arc::new(postgres::PostgresMembershipRepo::new(pool.clone())),
            transfers: Arc::new(postgres::PostgresTransferRepo::new(pool.clone())),
            entries: Arc::new(postgres::PostgresEntryRepo::new(pool.clone())),
            attachments: Arc::new(postgres::PostgresAttachmentRepo::new(pool.clone())),
            tasks: Arc::new(postgres::PostgresTaskRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Postgres(pool),
            repos,
        }
    }

    /// Create a database pool from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;
                Ok(Self::from_sqlite(pool))
            }
            #[cfg(feature = "database-postgres")]
            DatabaseConfig::Postgres(cfg) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .min_connections(cfg.min_connections)
                    .max_connections(cfg.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
                    .connect(&cfg.url)
                    .await?;
                Ok(Self::from_postgres(pool))
            }
        }
    }

    /// Run database migrations using sqlx's migration runner.
    /// This automatically creates and manages a _sqlx_migrations table.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pool) => {
                tracing::info!("Running PostgreSQL migrations");
                sqlx::migrate!("./migrations/postgres").run(pool).await?;
                tracing::info!("PostgreSQL migrations completed successfully");
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }

    pub fn conversations(&self) -> Arc<dyn ConversationRepo> {
        Arc::clone(&self.repos.conversations)
    }

    pub fn memberships(&self) -> Arc<dyn MembershipRepo> {
        Arc::clone(&self.repos.memberships)
    }

    pub fn transfers(&self) -> Arc<dyn TransferRepo> {
        Arc::clone(&self.repos.transfers)
    }

    pub fn entries(&self) -> Arc<dyn EntryRepo> {
        Arc::clone(&self.repos.entries)
    }

    pub fn attachments(&self) -> Arc<dyn AttachmentRepo> {
        Arc::clone(&self.repos.attachments)
    }

    pub fn tasks(&self) -> Arc<dyn TaskRepo> {
        Arc::clone(&self.repos.tasks)
    }

    /// Health check for database connectivity.
    pub async fn health_check(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(feature = "database-postgres")]
            PoolStorage::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            PoolStorage::_None(infallible) => match *infallible {},
        }
    }
}
