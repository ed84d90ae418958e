//! Opaque cursors for keyset pagination.
//!
//! Two cursor shapes exist:
//!
//! - [`Cursor`] encodes `(created_at, id)` and pages conversation listings,
//!   which sort ascending by creation time with the id as tie-breaker.
//! - [`EntryCursor`] encodes a bare entry id. Entry streams are filtered
//!   in memory after the ancestry walk, so the position of the last
//!   returned entry is enough to resume.
//!
//! Cursors encode timestamps at millisecond precision; entities that page
//! by them truncate their stored timestamps with [`truncate_to_millis`] so
//! the decoded cursor compares equal to the stored value.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("invalid cursor format")]
    InvalidFormat,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid timestamp in cursor")]
    InvalidTimestamp,
    #[error("invalid UUID in cursor")]
    InvalidUuid,
}

/// Keyset cursor over `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// Encode as URL-safe base64 of `{timestamp_millis}:{uuid}`.
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.created_at.timestamp_millis(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        let raw = String::from_utf8(bytes).map_err(|_| CursorError::InvalidFormat)?;

        // UUIDs use hyphens not colons, so ':' cleanly separates the parts.
        let (timestamp_str, uuid_str) = raw.split_once(':').ok_or(CursorError::InvalidFormat)?;

        let timestamp_millis: i64 = timestamp_str
            .parse()
            .map_err(|_| CursorError::InvalidTimestamp)?;
        let created_at = DateTime::from_timestamp_millis(timestamp_millis)
            .ok_or(CursorError::InvalidTimestamp)?;
        let id = Uuid::parse_str(uuid_str).map_err(|_| CursorError::InvalidUuid)?;

        Ok(Self { created_at, id })
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Cursor over an entry stream: the id of the last returned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCursor(pub Uuid);

impl EntryCursor {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        Uuid::from_slice(&bytes)
            .map(EntryCursor)
            .map_err(|_| CursorError::InvalidUuid)
    }
}

impl std::fmt::Display for EntryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Truncate a DateTime to millisecond precision.
///
/// Cursors encode milliseconds; without truncation the cursor timestamp
/// would not compare equal to a nanosecond-precision stored value, which
/// breaks keyset comparisons on SQLite's TEXT timestamps.
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_encode_decode_roundtrip() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let cursor = Cursor::new(now, id);

        let decoded = Cursor::decode(&cursor.encode()).unwrap();

        assert_eq!(
            cursor.created_at.timestamp_millis(),
            decoded.created_at.timestamp_millis()
        );
        assert_eq!(cursor.id, decoded.id);
    }

    #[test]
    fn test_cursor_encode_is_url_safe() {
        let encoded = Cursor::new(Utc::now(), Uuid::new_v4()).encode();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_cursor_decode_invalid_base64() {
        assert!(matches!(
            Cursor::decode("not valid base64!!!"),
            Err(CursorError::Base64(_))
        ));
    }

    #[test]
    fn test_cursor_decode_invalid_format() {
        let encoded = URL_SAFE_NO_PAD.encode(b"no_separator_here");
        assert!(matches!(
            Cursor::decode(&encoded),
            Err(CursorError::InvalidFormat)
        ));
    }

    #[test]
    fn test_cursor_decode_invalid_timestamp() {
        let encoded =
            URL_SAFE_NO_PAD.encode(b"not_a_number:00000000-0000-0000-0000-000000000000");
        assert!(matches!(
            Cursor::decode(&encoded),
            Err(CursorError::InvalidTimestamp)
        ));
    }

    #[test]
    fn test_entry_cursor_roundtrip() {
        let id = Uuid::new_v4();
        let decoded = EntryCursor::decode(&EntryCursor(id).encode()).unwrap();
        assert_eq!(decoded.0, id);
    }

    #[test]
    fn test_entry_cursor_rejects_garbage() {
        assert!(EntryCursor::decode("AaBb").is_err());
    }

    #[test]
    fn test_truncate_to_millis() {
        let now = Utc::now();
        let truncated = truncate_to_millis(now);
        assert_eq!(truncated.timestamp_subsec_micros() % 1000, 0);
        assert_eq!(truncated.timestamp_millis(), now.timestamp_millis());
    }
}
