//! Utility module
//!
//! Timestamp helpers shared by the frame decoder and the serde adapters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Converts milliseconds since the Unix epoch to a UTC datetime
pub fn datetime_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Parses a textual timestamp.
///
/// Accepts RFC 3339, a naive ISO-8601 date-time (read as UTC) or a bare date
/// (midnight UTC).
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Reads a frame's `timestamp` value.
///
/// Returns `None` for absent, zero or empty values and for anything
/// unparseable; callers substitute the receipt time.
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let millis = number.as_f64()?;
            if !millis.is_finite() || millis == 0.0 {
                return None;
            }
            datetime_from_millis(millis.trunc() as i64)
        }
        Value::String(text) if !text.is_empty() => parse_datetime(text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_epoch_millis() {
        let at = timestamp_from_value(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);

        let fractional = timestamp_from_value(&json!(1_700_000_000_000.9)).unwrap();
        assert_eq!(fractional.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_iso_strings() {
        let rfc = timestamp_from_value(&json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(rfc.timestamp_millis(), 1_700_000_000_000);

        let offset = timestamp_from_value(&json!("2023-11-14T23:13:20+01:00")).unwrap();
        assert_eq!(offset, rfc);

        let naive = timestamp_from_value(&json!("2023-11-14T22:13:20.000")).unwrap();
        assert_eq!(naive, rfc);

        let date = timestamp_from_value(&json!("2023-11-14")).unwrap();
        assert_eq!(date.to_rfc3339(), "2023-11-14T00:00:00+00:00");
    }

    #[test]
    fn test_missing_or_falsy() {
        assert!(timestamp_from_value(&Value::Null).is_none());
        assert!(timestamp_from_value(&json!(0)).is_none());
        assert!(timestamp_from_value(&json!("")).is_none());
        assert!(timestamp_from_value(&json!("yesterday")).is_none());
        assert!(timestamp_from_value(&json!(true)).is_none());
    }
}
