use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use chrono::{DateTime, Utc};

/// Serializes Duration as whole milliseconds
pub fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    millis.serialize(serializer)
}

/// Deserializes Duration from whole milliseconds
pub fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// Serializes a UTC timestamp as milliseconds since the Unix epoch
pub fn serialize_epoch_millis<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    time.timestamp_millis().serialize(serializer)
}

/// Deserializes a UTC timestamp from milliseconds since the Unix epoch
pub fn deserialize_epoch_millis<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = i64::deserialize(deserializer)?;
    crate::util::datetime_from_millis(millis)
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", millis)))
}
