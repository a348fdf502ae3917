use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::core::Error;

/// One inbound line as seen by the framing layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// A complete line of text, newline stripped
    Text(String),
    /// A line longer than the configured maximum; its bytes were discarded
    Oversized,
}

/// Newline-delimited text codec for device frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    /// Creates a codec that rejects lines longer than `max_length` bytes
    pub fn new(max_length: usize) -> Self {
        FrameCodec {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    /// Longest line this codec accepts
    pub fn max_length(&self) -> usize {
        self.lines.max_length()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(crate::core::MAX_FRAME_LENGTH)
    }
}

fn map_lines_error(err: LinesCodecError) -> Result<Option<RawFrame>, Error> {
    match err {
        // LinesCodec keeps discarding until the next newline, so the stream stays usable
        LinesCodecError::MaxLineLengthExceeded => Ok(Some(RawFrame::Oversized)),
        LinesCodecError::Io(e) => Err(Error::Io(e)),
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode(src) {
            Ok(line) => Ok(line.map(RawFrame::Text)),
            Err(e) => map_lines_error(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode_eof(src) {
            Ok(line) => Ok(line.map(RawFrame::Text)),
            Err(e) => map_lines_error(e),
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains('\n') {
            return Err(Error::protocol("outbound frame must not contain a newline"));
        }
        self.lines.encode(item, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => Error::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                Error::protocol("outbound frame exceeds the maximum length")
            }
        })
    }
}
