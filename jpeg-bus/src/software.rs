//! Pure Rust decode sink.
//!
//! Decodes on a small pool of worker threads with `jpeg-decoder`. With more
//! than one worker, outputs come back in whatever order the workers finish.

use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError},
};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::frame::{DecodedFrame, EncodedFrame, PixelFormat, PlaneLayout};
use crate::sink::{Acceleration, DecodeSink, SinkCaps, SinkError};

type OutputQueue = Arc<Mutex<VecDeque<Result<DecodedFrame, SinkError>>>>;

pub struct SoftwareSink {
    input: Mutex<Option<SyncSender<EncodedFrame>>>,
    output: OutputQueue,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl SoftwareSink {
    /// Starts `workers` decoder threads behind an input queue of `queue_depth`
    /// frames. A full queue makes `submit` fail with `ResourceExhausted`.
    pub fn new(workers: usize, queue_depth: usize) -> anyhow::Result<Self> {
        let (tx, rx) = std::sync::mpsc::sync_channel::<EncodedFrame>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let output: OutputQueue = Arc::new(Mutex::new(VecDeque::new()));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let output = output.clone();
            let cancel = cancel.clone();
            let handle = std::thread::Builder::new()
                .name(format!("jpeg-decode-{}", i))
                .spawn(move || Self::decoder_loop(rx, output, cancel))?;
            handles.push(handle);
        }
        log::info!("software decoder started with {} workers", handles.len());

        Ok(Self {
            input: Mutex::new(Some(tx)),
            output,
            cancel,
            workers: handles,
        })
    }

    fn decoder_loop(
        rx: Arc<Mutex<Receiver<EncodedFrame>>>,
        output: OutputQueue,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            // hold the receiver only while waiting so other workers can decode
            let next = match rx.lock() {
                Ok(rx) => rx.recv_timeout(Duration::from_millis(1)),
                Err(_) => break,
            };
            match next {
                Ok(frame) => {
                    let result = decode(&frame);
                    if let Err(e) = &result {
                        log::error!("decode of {} bytes failed: {}", frame.size(), e);
                    }
                    match output.lock() {
                        Ok(mut queue) => queue.push_back(result),
                        Err(_) => break,
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("software decoder worker exit");
    }
}

fn decode(frame: &EncodedFrame) -> Result<DecodedFrame, SinkError> {
    let mut decoder = jpeg_decoder::Decoder::new(frame.data().as_ref());
    let pixels = decoder
        .decode()
        .map_err(|e| SinkError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| SinkError::Decode("decoder returned no image info".to_string()))?;

    let (format, pixel_size) = match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => (PixelFormat::Gray8, 1),
        jpeg_decoder::PixelFormat::L16 => (PixelFormat::Gray16, 2),
        jpeg_decoder::PixelFormat::RGB24 => (PixelFormat::Rgb24, 3),
        jpeg_decoder::PixelFormat::CMYK32 => (PixelFormat::Cmyk32, 4),
    };
    let (width, height) = (info.width as usize, info.height as usize);
    let plane = PlaneLayout::packed(width, height, pixel_size, 0);
    DecodedFrame::new(
        Bytes::from(pixels),
        width as u32,
        height as u32,
        format,
        vec![plane],
    )
    .map_err(|e| SinkError::Decode(format!("{:#}", e)))
}

impl DecodeSink for SoftwareSink {
    fn submit(&self, frame: EncodedFrame) -> Result<(), SinkError> {
        let input = self.input.lock().map_err(|_| SinkError::Closed)?;
        let tx = input.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::ResourceExhausted,
            TrySendError::Disconnected(_) => SinkError::Closed,
        })
    }

    fn poll_output(&self) -> Result<Option<DecodedFrame>, SinkError> {
        let mut queue = self.output.lock().map_err(|_| SinkError::Closed)?;
        queue.pop_front().transpose()
    }

    fn caps(&self) -> SinkCaps {
        SinkCaps {
            name: "jpeg-decoder".to_string(),
            acceleration: Acceleration::Software,
            width_range: 1..=u16::MAX as u32,
            height_range: 1..=u16::MAX as u32,
        }
    }
}

impl Drop for SoftwareSink {
    fn drop(&mut self) {
        if let Ok(mut input) = self.input.lock() {
            input.take();
        }
        self.cancel.cancel();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        log::debug!("software decoder stopped");
    }
}
