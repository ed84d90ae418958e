use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

pub(super) fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

pub(super) fn parse_opt_uuid(s: Option<String>) -> DbResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Map a unique-constraint violation to a domain conflict, passing other
/// errors through.
pub(super) fn conflict_on_unique(err: sqlx::Error, message: &str) -> DbError {
    if let Some(db_err) = err.as_database_error()
        && db_err.is_unique_violation()
    {
        return DbError::Conflict(message.to_string());
    }
    DbError::Sqlx(err)
}
