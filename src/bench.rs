use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use jpeg_bus::software::SoftwareSink;
use jpeg_bus::{Container, DecodeSink, DecodedFrame, EncodedFrame, Pipeline, PipelineReport};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{BenchConfig, DecodeArgs, SinkArgs, SinkKind};

/// A JPEG file read into memory and parsed.
#[derive(Debug)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub data: Bytes,
    pub container: Container,
}

impl LoadedImage {
    pub fn frame(&self) -> EncodedFrame {
        EncodedFrame::from_container(&self.data, &self.container)
    }
}

pub async fn load_image(path: &Path) -> anyhow::Result<LoadedImage> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    log::info!("{}: file size {}", path.display(), data.len());

    let data = Bytes::from(data);
    let container = Container::parse(&data)
        .with_context(|| format!("failed to parse JPEG file {}", path.display()))?;
    if container.width == 0 || container.height == 0 {
        anyhow::bail!("{}: failed to detect image dimensions", path.display());
    }
    if container.num_components == 0 {
        anyhow::bail!("{}: failed to detect the number of components", path.display());
    }
    for warning in &container.warnings {
        log::warn!("{}: {}", path.display(), warning);
    }
    log::info!(
        "{}: {} x {}, {} components, {} segments",
        path.display(),
        container.width,
        container.height,
        container.num_components,
        container.segments.len()
    );

    Ok(LoadedImage {
        path: path.to_path_buf(),
        data,
        container,
    })
}

/// `window` is the most frames the caller keeps in flight. The software
/// queue is sized to hold all of them, since a full queue fails the submit.
fn open_sink(
    args: &SinkArgs,
    width: u16,
    height: u16,
    window: usize,
) -> anyhow::Result<Arc<dyn DecodeSink>> {
    match args.sink {
        SinkKind::Software => {
            let queue_depth = args.queue_depth.max(window);
            if queue_depth > args.queue_depth {
                log::debug!(
                    "software queue raised from {} to the window of {}",
                    args.queue_depth,
                    window
                );
            }
            let sink = SoftwareSink::new(args.workers, queue_depth)?;
            Ok(Arc::new(sink))
        }
        #[cfg(feature = "ffmpeg")]
        SinkKind::Ffmpeg => {
            let sink = jpeg_bus::ffmpeg::FfmpegSink::open(width, height)?;
            Ok(Arc::new(sink))
        }
        #[cfg(not(feature = "ffmpeg"))]
        SinkKind::Ffmpeg => {
            let _ = (width, height, window);
            anyhow::bail!("built without the `ffmpeg` feature")
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub files: Vec<String>,
    pub decoder: String,
    pub acceleration: String,
    pub total_items: usize,
    pub completed: usize,
    pub window_limit: usize,
    pub peak_in_flight: usize,
    pub decoded_bytes: u64,
    pub elapsed_sec: f64,
    pub fps: f64,
}

impl BenchReport {
    fn new(
        images: &[LoadedImage],
        sink: &dyn DecodeSink,
        window_limit: usize,
        report: &PipelineReport,
    ) -> Self {
        let caps = sink.caps();
        Self {
            files: images
                .iter()
                .map(|i| i.path.display().to_string())
                .collect(),
            decoder: caps.name,
            acceleration: caps.acceleration.to_string(),
            total_items: report.total_items,
            completed: report.completed,
            window_limit,
            peak_in_flight: report.peak_in_flight,
            decoded_bytes: report.decoded_bytes,
            elapsed_sec: report.elapsed.as_secs_f64(),
            fps: report.fps(),
        }
    }
}

pub async fn bench(config: &BenchConfig, cancel: CancellationToken) -> anyhow::Result<BenchReport> {
    if config.files.is_empty() {
        anyhow::bail!("no input files");
    }
    let mut images = Vec::with_capacity(config.files.len());
    for path in &config.files {
        images.push(load_image(path).await?);
    }
    let first = &images[0].container;
    if images
        .iter()
        .any(|i| (i.container.width, i.container.height) != (first.width, first.height))
    {
        log::warn!("input images differ in size, decoder is opened for the first one");
    }

    let sink = open_sink(
        &config.sink,
        first.width,
        first.height,
        config.pipeline.window_limit,
    )?;
    let frames = images.iter().map(LoadedImage::frame).collect();
    let pipeline = Pipeline::new(sink.clone(), config.pipeline.clone()).with_cancel(cancel);
    let report = pipeline.run(frames).await.context("decode pipeline failed")?;

    Ok(BenchReport::new(
        &images,
        sink.as_ref(),
        config.pipeline.window_limit,
        &report,
    ))
}

pub async fn run_bench(config: BenchConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let report = bench(&config, cancel).await?;
    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Decoded {} images in {:.6} sec",
            report.completed, report.elapsed_sec
        );
        println!("{:.2} FPS", report.fps);
    }
    Ok(())
}

/// Submits one frame and polls until it comes back.
async fn decode_one(
    sink: &dyn DecodeSink,
    frame: EncodedFrame,
    timeout: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<DecodedFrame> {
    sink.submit(frame).context("submit failed")?;
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(decoded) = sink.poll_output().context("output query failed")? {
            return Ok(decoded);
        }
        if Instant::now() >= deadline {
            anyhow::bail!("no output within {:?}", timeout);
        }
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
        }
    }
}

pub async fn run_decode(args: DecodeArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let image = load_image(&args.file).await?;
    let sink = open_sink(
        &args.sink,
        image.container.width,
        image.container.height,
        1,
    )?;
    log::info!("decoder: {}", sink.caps());

    let decoded = decode_one(
        sink.as_ref(),
        image.frame(),
        Duration::from_millis(args.timeout_ms),
        &cancel,
    )
    .await?;
    if decoded.is_all_zero() {
        log::warn!("output image is all zero");
    }

    let packed = decoded.to_packed();
    tokio::fs::write(&args.output, &packed)
        .await
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    log::info!(
        "wrote {} ({}, {} bytes) to {}",
        decoded,
        image.path.display(),
        packed.len(),
        args.output.display()
    );
    Ok(())
}
