//! JPEG marker bytes and raw marker search.
//!
//! Every marker is two bytes: the [`PREFIX`] `0xFF` followed by a byte that
//! identifies its kind. Only the kinds the container parser acts on get a
//! constant here; everything else is carried through as an opaque byte.
//!
//! Reference: <https://github.com/corkami/formats/blob/master/image/jpeg.md>

pub const PREFIX: u8 = 0xFF;

/// Start Of Image
pub const SOI: u8 = 0xD8;
/// End Of Image
pub const EOI: u8 = 0xD9;
/// Start Of Frame (Baseline DCT)
pub const SOF0: u8 = 0xC0;
/// Start Of Frame (Progressive DCT)
pub const SOF2: u8 = 0xC2;
/// Define Huffman Table
pub const DHT: u8 = 0xC4;
/// Start Of Scan
pub const SOS: u8 = 0xDA;
/// Define Quantization Table
pub const DQT: u8 = 0xDB;
/// Application segment 0 (JFIF)
pub const APP0: u8 = 0xE0;
/// Application segment 1 (EXIF)
pub const APP1: u8 = 0xE1;
/// Comment
pub const COM: u8 = 0xFE;

/// Whether `marker` is a bare two-byte marker without a length field.
pub fn is_standalone(marker: u8) -> bool {
    marker == SOI || marker == EOI
}

/// Short name used in logs and error messages.
pub fn name(marker: u8) -> &'static str {
    match marker {
        SOI => "SOI",
        EOI => "EOI",
        SOF0 => "SOF0",
        SOF2 => "SOF2",
        DHT => "DHT",
        SOS => "SOS",
        DQT => "DQT",
        APP0 => "APP0",
        APP1 => "APP1",
        COM => "COM",
        0xE2..=0xEF => "APPn",
        0xC1 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => "SOFn",
        _ => "unknown",
    }
}

/// Finds the next `{0xFF, marker}` pair at or after `from`.
///
/// This is a literal byte search and knows nothing about segment boundaries or
/// byte stuffing, so a `FF D9` pair inside entropy-coded data will match.
pub fn find_marker(data: &[u8], from: usize, marker: u8) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w[0] == PREFIX && w[1] == marker)
        .map(|pos| from + pos)
}
