use thiserror::Error;

use crate::{ancestry::AncestryError, cache::CacheError, crypto::CryptoError, db::DbError};

/// Error taxonomy of the storage engine. The transport layer maps these
/// tags to status codes (404 / 403 / 400 / 409 / 499 / 500); the mapping
/// is a pure function of the variant.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Target entity missing or soft-deleted.
    #[error("Not found")]
    NotFound,

    /// Missing membership, insufficient level, or memory access without a
    /// client id.
    #[error("Forbidden")]
    Forbidden,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Deadline or caller cancellation. Never leaves a partial commit.
    #[error("Cancelled")]
    Cancelled,

    /// Crypto or backend failure. The message is for logs; transports
    /// surface a redacted one.
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => ServiceError::NotFound,
            DbError::Conflict(msg) => ServiceError::Conflict(msg),
            DbError::Validation(msg) => ServiceError::Validation(msg),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        ServiceError::Internal(format!("crypto error: {}", err))
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        ServiceError::Internal(format!("cache error: {}", err))
    }
}

impl From<AncestryError> for ServiceError {
    fn from(err: AncestryError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServiceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ServiceError::Cancelled
    }
}
