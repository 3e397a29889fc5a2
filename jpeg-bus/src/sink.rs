//! The decode sink contract.
//!
//! A sink accepts whole encoded images and hands back decoded frames some time
//! later. It decodes asynchronously and may hold several images in flight, so
//! outputs are not tied to any particular submission.

use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;

use thiserror::Error;

use crate::frame::{DecodedFrame, EncodedFrame};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink cannot accept more input right now.
    #[error("decoder resources exhausted")]
    ResourceExhausted,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The sink will not produce any more output.
    #[error("decoder reached end of stream")]
    EndOfStream,
    #[error("decode failed: {0}")]
    Decode(String),
    /// The sink has been shut down.
    #[error("decoder closed")]
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acceleration {
    NotSupported,
    Hardware,
    Gpu,
    Software,
}

impl Display for Acceleration {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        let name = match self {
            Acceleration::NotSupported => "not supported",
            Acceleration::Hardware => "hardware",
            Acceleration::Gpu => "gpu",
            Acceleration::Software => "software",
        };
        f.write_str(name)
    }
}

/// What a sink reports about itself. Informational only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkCaps {
    pub name: String,
    pub acceleration: Acceleration,
    pub width_range: RangeInclusive<u32>,
    pub height_range: RangeInclusive<u32>,
}

impl SinkCaps {
    pub fn supports(&self, width: u32, height: u32) -> bool {
        self.width_range.contains(&width) && self.height_range.contains(&height)
    }
}

impl Display for SinkCaps {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{} (acceleration: {}, width: {} - {}, height: {} - {})",
            self.name,
            self.acceleration,
            self.width_range.start(),
            self.width_range.end(),
            self.height_range.start(),
            self.height_range.end()
        )
    }
}

/// An asynchronous decoder.
///
/// `submit` and `poll_output` are called from different threads at the same
/// time. Every successful `submit` must eventually yield exactly one output.
pub trait DecodeSink: Send + Sync {
    /// Hands one encoded image to the decoder. Must not block indefinitely.
    fn submit(&self, frame: EncodedFrame) -> Result<(), SinkError>;

    /// Returns a decoded frame if one is ready. Never blocks.
    fn poll_output(&self) -> Result<Option<DecodedFrame>, SinkError>;

    fn caps(&self) -> SinkCaps;
}
