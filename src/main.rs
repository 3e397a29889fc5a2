use clap::Parser;
use tokio_util::sync::CancellationToken;

mod bench;
mod config;

use config::{BenchConfig, Cli, Command};

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    // RUST_LOG is parsed last so it wins over the flags
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("jpeg_bench", level)
        .filter_module("jpeg_bus", level)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = jpeg_bus::init() {
        eprintln!("Error initializing decoder backends: {:#}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, stopping");
            cancel_clone.cancel();
        }
    });

    let result = match cli.command {
        Command::Bench(args) => match BenchConfig::try_from(args) {
            Ok(config) => bench::run_bench(config, cancel).await,
            Err(e) => Err(e),
        },
        Command::Decode(args) => bench::run_decode(args, cancel).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
