use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{JpegError, Result, SegmentFault};
use crate::marker;

/// One marker-delimited unit of a JPEG container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the `0xFF` marker byte in the source buffer
    pub offset: usize,
    /// Second marker byte; the first is always `0xFF`
    pub marker: u8,
    /// Declared length including the two length bytes, 0 for SOI/EOI
    pub length: u16,
    /// `length - 2` bytes following the length field
    pub payload: Bytes,
}

impl Segment {
    pub fn marker_bytes(&self) -> [u8; 2] {
        [marker::PREFIX, self.marker]
    }

    pub fn name(&self) -> &'static str {
        marker::name(self.marker)
    }

    pub fn is_standalone(&self) -> bool {
        marker::is_standalone(self.marker)
    }

    /// Bytes this segment occupies in the source buffer.
    pub fn encoded_len(&self) -> usize {
        2 + self.length as usize
    }

    /// Rebuilds the raw bytes of the segment: marker, length field, payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        out.put_slice(&self.marker_bytes());
        if !self.is_standalone() {
            out.put_u16(self.length);
            out.put_slice(&self.payload);
        }
        out.freeze()
    }
}

/// Reads one segment at `cursor`.
///
/// Returns `Ok(None)` when the byte at the cursor is not `0xFF` (or fewer than
/// two bytes remain), which is how the container parser learns that scan data
/// has begun. On success returns the segment and the cursor just past it.
pub fn scan_segment(data: &Bytes, cursor: usize) -> Result<Option<(Segment, usize)>> {
    if cursor + 2 > data.len() || data[cursor] != marker::PREFIX {
        return Ok(None);
    }
    let id = data[cursor + 1];

    if marker::is_standalone(id) {
        let segment = Segment {
            offset: cursor,
            marker: id,
            length: 0,
            payload: Bytes::new(),
        };
        log::trace!("marker {} at {}", segment.name(), cursor);
        return Ok(Some((segment, cursor + 2)));
    }

    let malformed = |reason| JpegError::MalformedSegment {
        offset: cursor,
        marker: id,
        reason,
    };

    let length_at = cursor + 2;
    let available = data.len() - length_at;
    if available < 2 {
        return Err(malformed(SegmentFault::TruncatedLength { available }));
    }
    let length = u16::from_be_bytes([data[length_at], data[length_at + 1]]);
    if length < 2 {
        return Err(malformed(SegmentFault::LengthTooSmall { length }));
    }
    if length as usize > available {
        return Err(malformed(SegmentFault::Overrun { length, available }));
    }

    let end = length_at + length as usize;
    let segment = Segment {
        offset: cursor,
        marker: id,
        length,
        payload: data.slice(length_at + 2..end),
    };
    log::trace!(
        "marker {} at {}, length {}",
        segment.name(),
        cursor,
        segment.length
    );
    Ok(Some((segment, end)))
}
