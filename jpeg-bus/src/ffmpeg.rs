//! Decode sink backed by FFmpeg's MJPEG decoders.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::{BufMut, BytesMut};
use ffmpeg_next::format::Pixel;

use crate::frame::{DecodedFrame, EncodedFrame, PixelFormat, PlaneLayout};
use crate::hw;
use crate::sink::{Acceleration, DecodeSink, SinkCaps, SinkError};

struct DecoderState {
    decoder: ffmpeg_next::codec::decoder::Video,
    // frames pulled out early to make room for a packet
    ready: VecDeque<DecodedFrame>,
}

pub struct FfmpegSink {
    state: Mutex<DecoderState>,
    name: String,
    acceleration: Acceleration,
}

// The FFmpeg context is only touched while holding the mutex.
unsafe impl Send for FfmpegSink {}
unsafe impl Sync for FfmpegSink {}

impl FfmpegSink {
    /// Opens a decoder for images of the given size. Call `crate::init` first.
    ///
    /// A hardware decoder can be compiled in without a device to run on, so
    /// one that fails to open falls back to the software decoder.
    pub fn open(width: u16, height: u16) -> anyhow::Result<Self> {
        if let Some(codec) = hw::find_hw_decoder() {
            match Self::open_codec(codec, width, height) {
                Ok(decoder) => return Ok(Self::new(decoder, codec, Acceleration::Hardware)),
                Err(e) => log::warn!(
                    "{} failed to open: {:#}, falling back to software",
                    codec.name(),
                    e
                ),
            }
        } else {
            log::warn!("no hardware MJPEG decoder, falling back to software");
        }
        let codec = hw::find_sw_decoder()?;
        let decoder = Self::open_codec(codec, width, height)?;
        Ok(Self::new(decoder, codec, Acceleration::Software))
    }

    fn open_codec(
        codec: ffmpeg_next::Codec,
        width: u16,
        height: u16,
    ) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).width = width as i32;
            (*decoder_ctx.as_mut_ptr()).height = height as i32;
        }
        let decoder = decoder_ctx.decoder().open_as(codec)?.video()?;
        log::info!("opened {} for {} x {}", codec.name(), width, height);
        Ok(decoder)
    }

    fn new(
        decoder: ffmpeg_next::codec::decoder::Video,
        codec: ffmpeg_next::Codec,
        acceleration: Acceleration,
    ) -> Self {
        Self {
            state: Mutex::new(DecoderState {
                decoder,
                ready: VecDeque::new(),
            }),
            name: codec.name().to_string(),
            acceleration,
        }
    }
}

impl DecoderState {
    fn receive_frame(&mut self) -> Result<Option<DecodedFrame>, SinkError> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => to_decoded(&frame).map(Some),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Err(SinkError::EndOfStream),
            Err(err) => Err(SinkError::Decode(err.to_string())),
        }
    }
}

impl DecodeSink for FfmpegSink {
    fn submit(&self, frame: EncodedFrame) -> Result<(), SinkError> {
        let mut state = self.state.lock().map_err(|_| SinkError::Closed)?;
        let packet = ffmpeg_next::Packet::copy(frame.data());
        loop {
            match state.decoder.send_packet(&packet) {
                Ok(()) => return Ok(()),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    // input is full until pending output is read
                    match state.receive_frame()? {
                        Some(decoded) => state.ready.push_back(decoded),
                        None => return Err(SinkError::ResourceExhausted),
                    }
                }
                Err(err) => return Err(SinkError::InvalidInput(err.to_string())),
            }
        }
    }

    fn poll_output(&self) -> Result<Option<DecodedFrame>, SinkError> {
        let mut state = self.state.lock().map_err(|_| SinkError::Closed)?;
        if let Some(frame) = state.ready.pop_front() {
            return Ok(Some(frame));
        }
        state.receive_frame()
    }

    fn caps(&self) -> SinkCaps {
        SinkCaps {
            name: self.name.clone(),
            acceleration: self.acceleration,
            width_range: 1..=u16::MAX as u32,
            height_range: 1..=u16::MAX as u32,
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Err(e) = state.decoder.send_eof() {
                log::error!("decoder send eof error: {}", e);
            }
        }
        log::debug!("{} closed", self.name);
    }
}

/// Copies the frame's planes into one owned buffer and records where each
/// plane sits in it.
fn to_decoded(frame: &ffmpeg_next::frame::Video) -> Result<DecodedFrame, SinkError> {
    let (format, pixel_sizes): (PixelFormat, &[usize]) = match frame.format() {
        Pixel::NV12 => (PixelFormat::Nv12, &[1, 2]),
        Pixel::YUV420P | Pixel::YUVJ420P => (PixelFormat::Yuv420p, &[1, 1, 1]),
        Pixel::YUV422P | Pixel::YUVJ422P => (PixelFormat::Yuv422p, &[1, 1, 1]),
        Pixel::YUV444P | Pixel::YUVJ444P => (PixelFormat::Yuv444p, &[1, 1, 1]),
        Pixel::GRAY8 => (PixelFormat::Gray8, &[1]),
        other => {
            return Err(SinkError::Decode(format!(
                "unsupported output pixel format {:?}",
                other
            )));
        }
    };

    let mut data = BytesMut::new();
    let mut planes = Vec::with_capacity(pixel_sizes.len());
    for (index, pixel_size) in pixel_sizes.iter().enumerate() {
        planes.push(PlaneLayout {
            width: frame.plane_width(index) as usize,
            height: frame.plane_height(index) as usize,
            pixel_size: *pixel_size,
            pitch: frame.stride(index),
            offset_x: 0,
            offset_y: 0,
            byte_offset: data.len(),
        });
        data.put_slice(frame.data(index));
    }

    DecodedFrame::new(data.freeze(), frame.width(), frame.height(), format, planes)
        .map_err(|e| SinkError::Decode(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use super::*;
    use crate::container::Container;

    fn encoded_jpeg(width: u16, height: u16) -> Bytes {
        let pixels: Vec<u8> = (0..width as usize * height as usize * 3)
            .map(|i| (i % 197) as u8 + 30)
            .collect();
        let mut out = Vec::new();
        jpeg_encoder::Encoder::new(&mut out, 90)
            .encode(&pixels, width, height, jpeg_encoder::ColorType::Rgb)
            .unwrap();
        Bytes::from(out)
    }

    fn wait_output(sink: &FfmpegSink) -> DecodedFrame {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(frame) = sink.poll_output().unwrap() {
                return frame;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("no output within 5s");
    }

    fn check_layout(frame: &DecodedFrame, width: usize, height: usize) {
        assert_eq!((frame.width(), frame.height()), (width as u32, height as u32));
        let luma = frame.planes()[0];
        assert_eq!((luma.width, luma.height), (width, height));
        assert!(luma.pitch >= luma.row_bytes());
        let expected_planes = match frame.format() {
            PixelFormat::Nv12 => 2,
            PixelFormat::Gray8 => 1,
            _ => 3,
        };
        assert_eq!(frame.planes().len(), expected_planes);
        assert_eq!(frame.to_packed().len(), frame.packed_len());
        assert!(!frame.is_all_zero());
    }

    #[test]
    fn test_decode_single_image() {
        crate::init().unwrap();
        let data = encoded_jpeg(64, 48);
        let image = Container::parse(&data).unwrap();
        let sink = FfmpegSink::open(image.width, image.height).unwrap();

        sink.submit(EncodedFrame::from_container(&data, &image))
            .unwrap();
        let frame = wait_output(&sink);
        check_layout(&frame, 64, 48);
    }

    #[test]
    fn test_back_to_back_submits() {
        crate::init().unwrap();
        let data = encoded_jpeg(32, 32);
        let image = Container::parse(&data).unwrap();
        let sink = FfmpegSink::open(image.width, image.height).unwrap();

        // later submits may find the decoder full and move output aside first
        for _ in 0..3 {
            sink.submit(EncodedFrame::from_container(&data, &image))
                .unwrap();
        }
        for _ in 0..3 {
            check_layout(&wait_output(&sink), 32, 32);
        }
    }
}
