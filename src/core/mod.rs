//! Core types and traits for the device link
//!
//! This module contains the configuration, alert model and error type used
//! throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{AlertKind, ConnectionConfig, DeviceAlert};

/// Default device port
pub const DEFAULT_PORT: u16 = 8080;

/// Offset added to the device port to reach the transport endpoint
pub const DEFAULT_PORT_OFFSET: u16 = 1000;

/// Default delay between a lost connection and the next attempt, in milliseconds
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5000;

/// Default bound on a single connection attempt, in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Longest inbound frame accepted, in bytes
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Outbound frames buffered towards the socket writer while connected
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;
