use std::fmt::{Display, Formatter};

use bytes::{BufMut, Bytes, BytesMut};

use crate::container::Container;

/// One whole encoded JPEG handed to a decode sink.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    data: Bytes,
    width: u16,
    height: u16,
}

impl EncodedFrame {
    /// Cuts the image out of `data` using the parsed EOI offset, dropping any
    /// trailing bytes after the end-of-image marker.
    pub fn from_container(data: &Bytes, container: &Container) -> Self {
        let len = container.image_len().min(data.len());
        Self {
            data: data.slice(..len),
            width: container.width,
            height: container.height,
        }
    }

    pub fn new(data: Bytes, width: u16, height: u16) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Y plane followed by an interleaved UV plane at half resolution
    Nv12,
    /// Three planes, chroma at half resolution in both directions
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Gray8,
    Gray16,
    Rgb24,
    Cmyk32,
}

/// Where one plane's pixels live inside a decoded frame buffer.
///
/// Rows are `pitch` bytes apart; the visible region starts `offset_y` rows
/// and `offset_x` pixels into the plane, which itself starts at `byte_offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    pub width: usize,
    pub height: usize,
    pub pixel_size: usize,
    pub pitch: usize,
    pub offset_x: usize,
    pub offset_y: usize,
    pub byte_offset: usize,
}

impl PlaneLayout {
    /// A plane without padding or cropping.
    pub fn packed(width: usize, height: usize, pixel_size: usize, byte_offset: usize) -> Self {
        Self {
            width,
            height,
            pixel_size,
            pitch: width * pixel_size,
            offset_x: 0,
            offset_y: 0,
            byte_offset,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width * self.pixel_size
    }

    pub fn packed_len(&self) -> usize {
        self.row_bytes() * self.height
    }

    /// One past the last buffer byte this plane reads.
    fn end(&self) -> usize {
        if self.height == 0 || self.width == 0 {
            return self.byte_offset;
        }
        self.row_start(self.height - 1) + self.row_bytes()
    }

    fn row_start(&self, y: usize) -> usize {
        self.byte_offset + self.pitch * (self.offset_y + y) + self.pixel_size * self.offset_x
    }
}

/// A frame produced by a decode sink.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    data: Bytes,
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<PlaneLayout>,
}

impl DecodedFrame {
    /// Fails if any plane reaches past the end of `data`.
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<PlaneLayout>,
    ) -> anyhow::Result<Self> {
        for (index, plane) in planes.iter().enumerate() {
            if plane.row_bytes() > plane.pitch && plane.height > 1 {
                anyhow::bail!(
                    "plane {} row of {} bytes exceeds pitch {}",
                    index,
                    plane.row_bytes(),
                    plane.pitch
                );
            }
            if plane.end() > data.len() {
                anyhow::bail!(
                    "plane {} ends at byte {} but buffer holds {}",
                    index,
                    plane.end(),
                    data.len()
                );
            }
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            planes,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    /// The underlying buffer, padding included.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the visible pixels once padding is stripped.
    pub fn packed_len(&self) -> usize {
        self.planes.iter().map(PlaneLayout::packed_len).sum()
    }

    /// Copies the visible rows of one plane into `dst`.
    pub fn copy_plane(&self, plane: &PlaneLayout, dst: &mut BytesMut) {
        let row = plane.row_bytes();
        for y in 0..plane.height {
            let start = plane.row_start(y);
            dst.put_slice(&self.data[start..start + row]);
        }
    }

    /// All planes back to back without row padding. NV12 output becomes the
    /// usual `width * height * 3 / 2` byte layout.
    pub fn to_packed(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.packed_len());
        for plane in &self.planes {
            self.copy_plane(plane, &mut out);
        }
        out.freeze()
    }

    pub fn is_all_zero(&self) -> bool {
        self.planes.iter().all(|plane| {
            (0..plane.height).all(|y| {
                let start = plane.row_start(y);
                self.data[start..start + plane.row_bytes()]
                    .iter()
                    .all(|b| *b == 0)
            })
        })
    }
}

impl Display for DecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "DecodedFrame {}x{} {:?}, planes: {}, bytes: {}",
            self.width,
            self.height,
            self.format,
            self.planes.len(),
            self.packed_len()
        )
    }
}
