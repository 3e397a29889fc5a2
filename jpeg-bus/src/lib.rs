//! JPEG container parsing and an admission-controlled decode pipeline.
//!
//! Data Flow:
//! ```text
//!  bytes ──► Container::parse ──► EncodedFrame ──► Pipeline ──► DecodeSink ──► DecodedFrame
//!            (segments, EOI,                        (submit / drain actors,
//!             width x height)                        bounded in-flight window)
//! ```

/// Registers FFmpeg components when the `ffmpeg` feature is on. Call once at
/// startup before opening an FFmpeg sink.
pub fn init() -> anyhow::Result<()> {
    #[cfg(feature = "ffmpeg")]
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    Ok(())
}

pub mod container;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
#[cfg(feature = "ffmpeg")]
pub mod hw;
pub mod marker;
pub mod pipeline;
pub mod segment;
pub mod sink;
pub mod software;

pub use container::{Container, FrameKind};
pub use error::{JpegError, ParseWarning, SegmentFault};
pub use frame::{DecodedFrame, EncodedFrame, PixelFormat, PlaneLayout};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineReport};
pub use sink::{Acceleration, DecodeSink, SinkCaps, SinkError};
