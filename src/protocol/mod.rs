//! Protocol implementation module
//!
//! This module defines the device wire framing, frame decoding and the
//! connection lifecycle state machine.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::{FrameCodec, RawFrame};
pub use self::message::{classify, decode_frame};
pub use self::state::{ConnectionState, LinkEvent};
