use crate::db::error::DbError;

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
