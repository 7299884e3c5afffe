//! Opaque pagination cursors
//!
//! Listings paginate on `(created_at, id)`. The cursor is the creation time in
//! UTC microseconds plus the row UUID, base64-encoded so clients treat it as
//! opaque.

use crate::error::{EngineError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Encode a `(created_at, id)` pair into an opaque cursor string.
pub fn encode_cursor(created_at: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!("{}:{}", created_at.timestamp_micros(), id);
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decode a cursor back into its `(created_at, id)` pair.
pub fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, Uuid)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_bytes())
        .map_err(|e| EngineError::bad_request(format!("malformed cursor: {e}")))?;
    let raw = String::from_utf8(bytes)
        .map_err(|_| EngineError::bad_request("malformed cursor: not utf-8"))?;

    let (micros_part, id_part) = raw
        .split_once(':')
        .ok_or_else(|| EngineError::bad_request("malformed cursor: missing separator"))?;

    let micros: i64 = micros_part
        .parse()
        .map_err(|_| EngineError::bad_request("malformed cursor: bad timestamp"))?;
    let created_at = Utc
        .timestamp_micros(micros)
        .single()
        .ok_or_else(|| EngineError::bad_request("malformed cursor: timestamp out of range"))?;

    let id = Uuid::parse_str(id_part)
        .map_err(|_| EngineError::bad_request("malformed cursor: bad uuid"))?;

    Ok((created_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_cursor_round_trip() {
        let now = Utc.timestamp_micros(1_722_500_000_123_456).single().unwrap();
        let id = Uuid::new_v4();

        let cursor = encode_cursor(now, id);
        let (decoded_at, decoded_id) = decode_cursor(&cursor).unwrap();

        assert_eq!(decoded_at, now);
        assert_eq!(decoded_id, id);
    }

    #[test]
    fn test_cursor_is_opaque_base64() {
        let cursor = encode_cursor(Utc::now(), Uuid::new_v4());
        assert!(!cursor.contains(':'));
    }

    #[test]
    fn test_garbage_cursor_is_bad_request() {
        for garbage in ["", "not base64 !!!", "YWJj"] {
            let err = decode_cursor(garbage).unwrap_err();
            assert_eq!(err.code(), ErrorCode::BadRequest);
        }
    }
}
