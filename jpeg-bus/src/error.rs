use std::fmt::{Display, Formatter};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, JpegError>;

/// Reasons a buffer is rejected by the container parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JpegError {
    /// The buffer does not start with `FF D8`.
    #[error("not a JPEG: start-of-image marker missing at offset 0")]
    NotAJpeg,

    /// A segment's length field is unusable.
    #[error("malformed segment {marker:02X} at offset {offset}: {reason}")]
    MalformedSegment {
        /// Offset of the segment's `0xFF` byte
        offset: usize,
        /// Second marker byte
        marker: u8,
        reason: SegmentFault,
    },

    /// No `FF D9` after the point where segment scanning stopped.
    #[error("end-of-image marker not found after offset {searched_from}")]
    MissingEoi { searched_from: usize },

    /// No frame header carrying a usable width and height.
    #[error("image dimensions unresolved: {0}")]
    DimensionsUnresolved(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFault {
    /// Fewer than two bytes left for the length field.
    TruncatedLength { available: usize },
    /// Declared length is below the size of the length field itself.
    LengthTooSmall { length: u16 },
    /// Payload runs past the end of the buffer.
    Overrun { length: u16, available: usize },
}

impl Display for SegmentFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentFault::TruncatedLength { available } => {
                write!(f, "length field truncated ({} bytes left)", available)
            }
            SegmentFault::LengthTooSmall { length } => {
                write!(f, "declared length {} is smaller than 2", length)
            }
            SegmentFault::Overrun { length, available } => write!(
                f,
                "declared length {} exceeds the {} bytes remaining",
                length, available
            ),
        }
    }
}

/// Non-fatal findings attached to a successfully parsed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseWarning {
    /// The frame header is SOF2; hardware decoders generally reject these.
    ProgressiveUnsupported { offset: usize },
}

impl Display for ParseWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseWarning::ProgressiveUnsupported { offset } => write!(
                f,
                "progressive frame header at offset {} may not be decoded",
                offset
            ),
        }
    }
}
