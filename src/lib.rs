//! Jetson Link: reconnecting client for a remote seizure-inference device
//!
//! The device streams newline-delimited JSON frames over TCP. [`DeviceLink`]
//! keeps that connection alive, turns each frame into a typed
//! [`DeviceAlert`] and reports connection-state changes to the registered
//! [`Callbacks`].
pub mod core;
pub mod network;
pub mod protocol;
pub mod util;

// Re-export commonly used items
pub use crate::core::{AlertKind, ConnectionConfig, DeviceAlert, Error, Result};
pub use crate::network::{
    test_connection, Backoff, Callbacks, DeviceLink, ExponentialBackoff, FixedBackoff,
};
pub use crate::protocol::ConnectionState;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
