use serde::Serialize;
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::DomainResult;
use crate::error::DomainError;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// SHA-256 over the canonical JSON form of an audit row.
pub fn ledger_hash<T>(value: &T) -> DomainResult<String>
where
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|err| {
        DomainError::Validation(format!("failed to serialize ledger payload: {err}"))
    })?;
    Ok(hex::encode(Sha256::digest(&payload)))
}

/// Tags a list of free-form ids with length prefixes, so ids containing the
/// separator can never make two different lists encode to the same key.
pub fn composite_key(tag: &str, parts: &[&str]) -> String {
    let mut key = String::from(tag);
    for part in parts {
        key.push(':');
        key.push_str(&part.len().to_string());
        key.push(':');
        key.push_str(part);
    }
    key
}

/// Rounds half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_hash_is_stable_for_equal_payloads() {
        let first = ledger_hash(&serde_json::json!({"points": 15, "user_id": "a"})).unwrap();
        let second = ledger_hash(&serde_json::json!({"points": 15, "user_id": "a"})).unwrap();
        let other = ledger_hash(&serde_json::json!({"points": 5, "user_id": "a"})).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn rounds_to_requested_places() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(12.345, 1), 12.3);
        assert_eq!(round_to(-4.26, 1), -4.3);
    }

    #[test]
    fn composite_keys_do_not_collide_on_separators() {
        assert_eq!(composite_key("vote", &["issue-1", "user-a"]), "vote:7:issue-1:6:user-a");
        assert_ne!(
            composite_key("event", &["e_1", "x"]),
            composite_key("event", &["e", "1_x"])
        );
        assert_ne!(
            composite_key("event", &["a:1", "b"]),
            composite_key("event", &["a", "1:b"])
        );
        assert_ne!(
            composite_key("event", &["1:a", ""]),
            composite_key("event", &["", "1:a"])
        );
    }

    #[test]
    fn formats_epoch_ms() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
    }
}
