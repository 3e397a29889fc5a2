use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use jpeg_bus::PipelineConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Benchmark accelerated JPEG decoding")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push the same images through the decoder repeatedly and report throughput
    Bench(BenchArgs),
    /// Decode one image and write the raw planes to a file
    Decode(DecodeArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// jpeg-decoder on worker threads
    Software,
    /// FFmpeg MJPEG decoder, hardware when available
    Ffmpeg,
}

#[derive(Args, Debug, Clone)]
pub struct SinkArgs {
    #[arg(long, value_enum, default_value_t = SinkKind::Software)]
    pub sink: SinkKind,

    /// Worker threads for the software decoder
    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    /// Frames the software decoder queues before refusing input
    #[arg(long, default_value_t = 16)]
    pub queue_depth: usize,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// JPEG files, submitted round-robin
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Number of frames to decode
    #[arg(short = 'n', long, default_value_t = 200)]
    pub count: usize,

    /// Maximum frames in flight
    #[arg(short, long, default_value_t = 4)]
    pub window: usize,

    #[arg(long, default_value_t = 5)]
    pub poll_interval_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub stall_timeout_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub sink: SinkArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    #[arg(default_value = "test.jpg")]
    pub file: PathBuf,

    /// Where to write the decoded planes
    #[arg(short, long, default_value = "output.raw")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    #[command(flatten)]
    pub sink: SinkArgs,
}

/// Settings for one `bench` run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub files: Vec<PathBuf>,
    pub pipeline: PipelineConfig,
    pub sink: SinkArgs,
    pub json: bool,
}

impl TryFrom<BenchArgs> for BenchConfig {
    type Error = anyhow::Error;

    fn try_from(args: BenchArgs) -> Result<Self, Self::Error> {
        let pipeline = PipelineConfig::default()
            .with_total_items(args.count)
            .with_window_limit(args.window)
            .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
            .with_stall_timeout(Duration::from_millis(args.stall_timeout_ms));
        pipeline.validate()?;
        if args.sink.workers == 0 {
            anyhow::bail!("--workers must be positive");
        }

        Ok(Self {
            files: args.files,
            pipeline,
            sink: args.sink,
            json: args.json,
        })
    }
}
