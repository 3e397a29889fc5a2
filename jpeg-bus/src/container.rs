//! Marker-level JPEG container parsing.
//!
//! The parser only walks the segment structure in front of the scan data; it
//! never touches entropy-coded bytes beyond searching them for the
//! end-of-image marker.
//!
//! ```text
//!  FF D8 | FF E0 len .. | FF DB len .. | FF C0 len .. | FF DA len .. | scan data .. | FF D9
//!  SOI     APP0           DQT            SOF0           SOS            ^data_offset   ^eoi_offset
//! ```

use bytes::Bytes;

use crate::error::{JpegError, ParseWarning, Result};
use crate::marker;
use crate::segment::{Segment, scan_segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Baseline,
    Progressive,
}

impl FrameKind {
    fn from_marker(id: u8) -> Option<Self> {
        match id {
            marker::SOF0 => Some(FrameKind::Baseline),
            marker::SOF2 => Some(FrameKind::Progressive),
            _ => None,
        }
    }
}

/// Structure of one JPEG image.
#[derive(Debug, Clone)]
pub struct Container {
    /// Segments in byte order, starting with SOI
    pub segments: Vec<Segment>,
    /// Where segment scanning stopped (start of scan data)
    pub data_offset: usize,
    /// Offset of the `FF D9` marker
    pub eoi_offset: usize,
    pub width: u16,
    pub height: u16,
    pub num_components: u8,
    pub frame_kind: FrameKind,
    pub warnings: Vec<ParseWarning>,
}

impl Container {
    /// Parses the container structure of `data`.
    ///
    /// Fails if the buffer does not start with SOI, a segment is malformed, no
    /// EOI follows the segments, or no frame header gives the image size.
    pub fn parse(data: &Bytes) -> Result<Self> {
        if marker::find_marker(data, 0, marker::SOI) != Some(0) {
            return Err(JpegError::NotAJpeg);
        }

        let mut segments = Vec::new();
        let mut cursor = 0;
        while let Some((segment, next)) = scan_segment(data, cursor)? {
            // Leave EOI for the marker search so an image without scan data
            // still resolves its end offset.
            if segment.marker == marker::EOI {
                break;
            }
            log::debug!(
                "segment {} at {} length {}",
                segment.name(),
                segment.offset,
                segment.length
            );
            segments.push(segment);
            cursor = next;
        }
        let data_offset = cursor;

        let eoi_offset = marker::find_marker(data, data_offset, marker::EOI).ok_or(
            JpegError::MissingEoi {
                searched_from: data_offset,
            },
        )?;
        log::debug!("EOI offset {}", eoi_offset);

        let (frame, frame_kind) = segments
            .iter()
            .find_map(|s| FrameKind::from_marker(s.marker).map(|kind| (s, kind)))
            .ok_or(JpegError::DimensionsUnresolved("no frame header segment"))?;

        log::debug!("frame header {}: {:02x?}", frame.name(), &frame.payload[..]);
        let payload = &frame.payload;
        if payload.len() < 5 {
            return Err(JpegError::DimensionsUnresolved(
                "frame header too short for dimensions",
            ));
        }
        let height = u16::from_be_bytes([payload[1], payload[2]]);
        let width = u16::from_be_bytes([payload[3], payload[4]]);
        let num_components = payload.get(5).copied().unwrap_or(0);
        if width == 0 || height == 0 {
            return Err(JpegError::DimensionsUnresolved(
                "frame header declares a zero dimension",
            ));
        }

        let mut warnings = Vec::new();
        if frame_kind == FrameKind::Progressive {
            let warning = ParseWarning::ProgressiveUnsupported {
                offset: frame.offset,
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }

        log::info!(
            "image size {} x {}, {} components",
            width,
            height,
            num_components
        );

        Ok(Self {
            segments,
            data_offset,
            eoi_offset,
            width,
            height,
            num_components,
            frame_kind,
            warnings,
        })
    }

    /// Convenience for callers holding a borrowed slice.
    pub fn parse_slice(data: &[u8]) -> Result<Self> {
        Self::parse(&Bytes::copy_from_slice(data))
    }

    /// Length of the image including the EOI marker.
    pub fn image_len(&self) -> usize {
        self.eoi_offset + 2
    }

    pub fn is_progressive(&self) -> bool {
        self.frame_kind == FrameKind::Progressive
    }

    pub fn segment(&self, id: u8) -> Option<&Segment> {
        self.segments.iter().find(|s| s.marker == id)
    }
}

#[cfg(test)]
#[path = "container_test.rs"]
mod container_test;
