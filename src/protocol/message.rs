//! Decoding of inbound device frames into [`DeviceAlert`]s.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{AlertKind, DeviceAlert, Error, Result};
use crate::util::timestamp_from_value;

/// `type` discriminator of a seizure frame
pub const SEIZURE_ALERT: &str = "seizure_alert";
/// `type` discriminator of a status frame
pub const STATUS: &str = "status";
/// `type` discriminator of an error frame
pub const ERROR: &str = "error";

const DEFAULT_STATUS_MESSAGE: &str = "System status updated";
const DEFAULT_ERROR_MESSAGE: &str = "System error";
const UNKNOWN_MESSAGE: &str = "Unknown device message";

/// Decodes one text frame received at `received_at`.
///
/// Fails only when the text is not JSON. Any valid JSON value yields an
/// alert; unrecognized shapes become [`AlertKind::Error`] alerts.
pub fn decode_frame(text: &str, received_at: DateTime<Utc>) -> Result<DeviceAlert> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| Error::protocol(format!("malformed device frame: {}", e)))?;
    Ok(classify(raw, received_at))
}

/// Normalizes an already decoded frame
pub fn classify(raw: Value, received_at: DateTime<Utc>) -> DeviceAlert {
    let timestamp = raw
        .get("timestamp")
        .and_then(timestamp_from_value)
        .unwrap_or(received_at);

    let (kind, confidence, message) = match raw.get("type").and_then(Value::as_str) {
        Some(SEIZURE_ALERT) => {
            let confidence = confidence_of(&raw);
            let mut message = format!("Seizure detected - confidence: {}%", confidence);
            if let Some(severity) = text_field(&raw, "severity") {
                message.push_str(&format!(" - severity: {}", severity));
            }
            (AlertKind::SeizureDetected, Some(confidence), message)
        }
        Some(STATUS) => {
            let message = text_field(&raw, "message").unwrap_or(DEFAULT_STATUS_MESSAGE);
            (AlertKind::SystemStatus, None, message.to_string())
        }
        Some(ERROR) => {
            let mut message = text_field(&raw, "message")
                .unwrap_or(DEFAULT_ERROR_MESSAGE)
                .to_string();
            if let Some(code) = error_code_of(&raw) {
                message.push_str(&format!(" ({})", code));
            }
            (AlertKind::Error, None, message)
        }
        _ => (AlertKind::Error, None, UNKNOWN_MESSAGE.to_string()),
    };

    DeviceAlert {
        kind,
        confidence,
        timestamp,
        message,
        raw,
    }
}

/// Confidence as a whole percentage; absent or non-numeric reads as 0
fn confidence_of(raw: &Value) -> u8 {
    raw.get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

fn text_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn error_code_of(raw: &Value) -> Option<String> {
    match raw.get("error_code")? {
        Value::String(code) if !code.is_empty() => Some(code.clone()),
        Value::Number(code) if code.as_f64() != Some(0.0) => Some(code.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::datetime_from_millis;
    use serde_json::json;

    fn received_at() -> DateTime<Utc> {
        datetime_from_millis(1_750_000_000_000).unwrap()
    }

    #[test]
    fn test_seizure_alert() {
        let alert = decode_frame(
            r#"{"type":"seizure_alert","confidence":82,"severity":"high"}"#,
            received_at(),
        )
        .unwrap();

        assert_eq!(alert.kind, AlertKind::SeizureDetected);
        assert_eq!(alert.confidence, Some(82));
        assert!(alert.message.contains("82"));
        assert!(alert.message.contains("high"));
        assert_eq!(alert.timestamp, received_at());
        assert_eq!(alert.raw["severity"], "high");
    }

    #[test]
    fn test_seizure_alert_without_confidence() {
        let alert = classify(json!({"type": "seizure_alert"}), received_at());
        assert_eq!(alert.confidence, Some(0));
        assert_eq!(alert.message, "Seizure detected - confidence: 0%");

        let alert = classify(json!({"type": "seizure_alert", "confidence": 91.6}), received_at());
        assert_eq!(alert.confidence, Some(92));

        let alert = classify(json!({"type": "seizure_alert", "confidence": 140}), received_at());
        assert_eq!(alert.confidence, Some(100));
    }

    #[test]
    fn test_frame_timestamp() {
        let alert = decode_frame(
            r#"{"type":"seizure_alert","confidence":91,"timestamp":1700000000000}"#,
            received_at(),
        )
        .unwrap();
        assert_eq!(alert.timestamp.timestamp_millis(), 1_700_000_000_000);

        let alert = classify(
            json!({"type": "status", "timestamp": "2023-11-14T22:13:20Z"}),
            received_at(),
        );
        assert_eq!(alert.timestamp.timestamp_millis(), 1_700_000_000_000);

        let alert = classify(json!({"type": "status", "timestamp": "not a date"}), received_at());
        assert_eq!(alert.timestamp, received_at());
    }

    #[test]
    fn test_status() {
        let alert = classify(json!({"type": "status", "message": "Model loaded"}), received_at());
        assert_eq!(alert.kind, AlertKind::SystemStatus);
        assert_eq!(alert.confidence, None);
        assert_eq!(alert.message, "Model loaded");

        let alert = classify(json!({"type": "status"}), received_at());
        assert_eq!(alert.message, DEFAULT_STATUS_MESSAGE);
    }

    #[test]
    fn test_error_frame() {
        let alert = classify(
            json!({"type": "error", "message": "Electrode detached", "error_code": "E12"}),
            received_at(),
        );
        assert_eq!(alert.kind, AlertKind::Error);
        assert_eq!(alert.message, "Electrode detached (E12)");

        let alert = classify(json!({"type": "error", "error_code": 503}), received_at());
        assert_eq!(alert.message, "System error (503)");

        let alert = classify(json!({"type": "error"}), received_at());
        assert_eq!(alert.message, DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_unknown_type_fallback() {
        let alert = classify(json!({"type": "bogus", "x": 1}), received_at());
        assert_eq!(alert.kind, AlertKind::Error);
        assert_eq!(alert.message, UNKNOWN_MESSAGE);
        assert_eq!(alert.raw["x"], 1);

        // valid JSON that is not an object is still delivered
        let alert = decode_frame("[1, 2, 3]", received_at()).unwrap();
        assert_eq!(alert.kind, AlertKind::Error);
    }

    #[test]
    fn test_null_frame_is_an_alert() {
        // `null` parses, so it reaches the alert handler rather than the error handler
        let alert = decode_frame("null", received_at()).unwrap();
        assert_eq!(alert.kind, AlertKind::Error);
        assert_eq!(alert.message, UNKNOWN_MESSAGE);
        assert_eq!(alert.timestamp, received_at());
        assert!(alert.raw.is_null());
    }

    #[test]
    fn test_malformed_frames() {
        for text in ["", "not json", "{\"type\":", "{'type': 'status'}"] {
            let result = decode_frame(text, received_at());
            assert!(matches!(result, Err(Error::Protocol(_))), "accepted {:?}", text);
        }
    }
}
