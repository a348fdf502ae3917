//! Network management and device communication module
//!
//! This module owns the device connection: dialing, frame dispatch to
//! consumer callbacks, and reconnection scheduling.

mod backoff;
mod connection;

pub use self::backoff::{Backoff, ExponentialBackoff, FixedBackoff};
pub use self::connection::{test_connection, Callbacks, DeviceLink};
