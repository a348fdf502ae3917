use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::error::{Error, Result};

/// Classification of an alert produced by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The device reported a predicted or ongoing seizure
    SeizureDetected,
    /// Informational status update from the device
    SystemStatus,
    /// Device-side error, or a frame the client could not classify
    Error,
}

impl AlertKind {
    /// Returns the wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SeizureDetected => "seizure_detected",
            AlertKind::SystemStatus => "system_status",
            AlertKind::Error => "error",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized event handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAlert {
    /// What kind of event this is
    pub kind: AlertKind,
    /// Confidence percentage, only set for seizure detections
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<u8>,
    /// Event time from the frame, or local receipt time
    #[serde(serialize_with = "super::serde::serialize_epoch_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_epoch_millis")]
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary
    pub message: String,
    /// The decoded frame as received
    pub raw: Value,
}

impl DeviceAlert {
    /// Returns true for seizure detections
    pub fn is_seizure(&self) -> bool {
        self.kind == AlertKind::SeizureDetected
    }
}

/// Connection settings for a single device endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Network address of the device
    pub host: String,
    /// Device port
    pub port: u16,
    /// Added to `port` to obtain the transport port
    pub port_offset: u16,
    /// Fixed delay before reconnecting
    #[serde(rename = "reconnect_interval_ms")]
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub reconnect_interval: Duration,
    /// Bound on a single connection attempt
    #[serde(rename = "connect_timeout_ms")]
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub connect_timeout: Duration,
    /// Give up after this many consecutive failed attempts (`None` = never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
    /// Longest inbound frame accepted, in bytes
    pub max_frame_length: usize,
    /// Outbound frames buffered towards the socket writer
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: super::DEFAULT_PORT,
            port_offset: super::DEFAULT_PORT_OFFSET,
            reconnect_interval: Duration::from_millis(super::DEFAULT_RECONNECT_INTERVAL_MS),
            connect_timeout: Duration::from_millis(super::DEFAULT_CONNECT_TIMEOUT_MS),
            max_reconnect_attempts: None,
            max_frame_length: super::MAX_FRAME_LENGTH,
            outbound_capacity: super::DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `host:port` with default settings
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Sets the port offset
    pub fn with_port_offset(mut self, offset: u16) -> Self {
        self.port_offset = offset;
        self
    }

    /// Sets the reconnect interval
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Caps consecutive reconnection attempts
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Port the transport actually connects to
    pub fn transport_port(&self) -> Result<u16> {
        self.port.checked_add(self.port_offset).ok_or_else(|| {
            Error::config(format!(
                "port {} + offset {} exceeds {}",
                self.port,
                self.port_offset,
                u16::MAX
            ))
        })
    }

    /// `host:port` string of the transport endpoint
    pub fn endpoint(&self) -> Result<String> {
        let port = self.transport_port()?;
        if self.host.contains(':') && !self.host.starts_with('[') {
            // bare IPv6 literal
            Ok(format!("[{}]:{}", self.host, port))
        } else {
            Ok(format!("{}:{}", self.host, port))
        }
    }

    /// Checks the configuration for values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("port must not be 0"));
        }
        self.transport_port()?;
        if self.reconnect_interval.is_zero() {
            return Err(Error::config("reconnect interval must be greater than 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be greater than 0"));
        }
        if self.max_frame_length == 0 {
            return Err(Error::config("max frame length must be greater than 0"));
        }
        if self.outbound_capacity == 0 {
            return Err(Error::config("outbound capacity must be greater than 0"));
        }
        Ok(())
    }

    /// Parses a configuration from TOML text; missing keys take defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ConnectionConfig = toml::from_str(text)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded device configuration from {}", path.display());
        Ok(config)
    }

    /// Renders the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport_port().unwrap(), 9080);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint() {
        let config = ConnectionConfig::new("127.0.0.1", 8080);
        assert_eq!(config.endpoint().unwrap(), "127.0.0.1:9080");

        let config = ConnectionConfig::new("::1", 7000).with_port_offset(0);
        assert_eq!(config.endpoint().unwrap(), "[::1]:7000");
    }

    #[test]
    fn test_port_overflow() {
        let config = ConnectionConfig::new("10.0.0.2", 65000);
        assert!(matches!(config.transport_port(), Err(Error::Config(_))));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation() {
        assert!(ConnectionConfig::new("", 8080).validate().is_err());
        assert!(ConnectionConfig::new("jetson", 0).validate().is_err());
        assert!(ConnectionConfig::new("jetson", 8080)
            .with_reconnect_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config = ConnectionConfig::from_toml_str(
            r#"
host = "192.168.1.100"
reconnect_interval_ms = 1000
"#,
        )
        .unwrap();
        assert_eq!(config.host, "192.168.1.100");
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
        assert_eq!(config.port, 8080);
        assert_eq!(config.port_offset, 1000);
        assert_eq!(config.max_reconnect_attempts, None);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ConnectionConfig::new("jetson.local", 8081).with_max_reconnect_attempts(3);
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("reconnect_interval_ms = 5000"));
        assert_eq!(ConnectionConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_alert_serialization() {
        let alert = DeviceAlert {
            kind: AlertKind::SeizureDetected,
            confidence: Some(82),
            timestamp: crate::util::datetime_from_millis(1_700_000_000_000).unwrap(),
            message: "Seizure detected - confidence: 82%".to_string(),
            raw: json!({"type": "seizure_alert", "confidence": 82}),
        };
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["kind"], "seizure_detected");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert!(alert.is_seizure());
        assert_eq!(AlertKind::SystemStatus.to_string(), "system_status");
    }
}
