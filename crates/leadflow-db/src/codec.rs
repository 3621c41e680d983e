//! Column encoding helpers shared by the store modules.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use leadflow_core::{JobId, OwnerId, TaxId};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 9999-12-31T23:59:59Z, the last second with a four-digit year.
const LAST_ENCODABLE_SECS: i64 = 253_402_300_799;
/// 0000-01-01T00:00:00Z
const FIRST_ENCODABLE_SECS: i64 = -62_167_219_200;

/// Encode a timestamp as fixed-width RFC 3339 so text comparison orders correctly.
///
/// Instants outside four-digit years are pinned to the nearest end.
pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    let secs = at.timestamp();
    if secs > LAST_ENCODABLE_SECS {
        return "9999-12-31T23:59:59.999999Z".to_string();
    }
    if secs < FIRST_ENCODABLE_SECS {
        return "0000-01-01T00:00:00.000000Z".to_string();
    }
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `at + by`, saturating at the ends of chrono's range.
pub(crate) fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

pub(crate) fn decode_time(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode(format!("invalid {column} timestamp '{raw}': {e}")))
}

pub(crate) fn decode_opt_time(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|raw| decode_time(&raw, column)).transpose()
}

pub(crate) fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| DatabaseError::Decode(format!("invalid JSON in {column}: {e}")))
}

pub(crate) fn decode_owner(raw: String) -> Result<OwnerId> {
    OwnerId::new(raw).map_err(|e| DatabaseError::Decode(e.to_string()))
}

pub(crate) fn decode_job_id(raw: String) -> Result<JobId> {
    JobId::new(raw).map_err(|e| DatabaseError::Decode(e.to_string()))
}

pub(crate) fn decode_tax_id(raw: &str) -> Result<TaxId> {
    TaxId::parse(raw).map_err(|e| DatabaseError::Decode(e.to_string()))
}

/// Convert a non-negative column value to `u32`.
pub(crate) fn decode_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}

/// Counts above `i64::MAX` are stored as `i64::MAX`.
pub(crate) fn encode_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_encoding_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("valid date");
        let encoded = encode_time(whole);
        assert_eq!(encoded, "2026-01-02T03:04:05.000000Z");
        assert_eq!(decode_time(&encoded, "created_at").expect("decode"), whole);
    }

    #[test]
    fn test_far_future_times_keep_text_order() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).single().expect("valid date");
        let far = saturating_add(now, Duration::MAX);
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);

        let encoded = encode_time(far);
        assert_eq!(encoded, "9999-12-31T23:59:59.999999Z");
        assert!(encode_time(now) < encoded);
        assert!(encode_time(saturating_add(now, Duration::MIN)) < encode_time(now));
        assert_eq!(saturating_add(now, Duration::seconds(5)), now + Duration::seconds(5));
    }

    #[test]
    fn test_encode_u64_saturates() {
        assert_eq!(encode_u64(120), 120);
        assert_eq!(encode_u64(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_decode_errors_name_the_column() {
        let err = decode_time("yesterday", "completed_at").expect_err("invalid timestamp");
        assert!(err.to_string().contains("completed_at"));

        let err = decode_json::<Vec<String>>("{", "results").expect_err("invalid json");
        assert!(err.to_string().contains("results"));
    }
}
