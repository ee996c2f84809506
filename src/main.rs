//! CaptchaHarvester - Bulk captcha capture and recognition

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use captcha_harvester::capture::{CaptureSource, DirectorySource};
use captcha_harvester::config::{self, AppConfig};
use captcha_harvester::ocr::OnnxOcrEngine;
use captcha_harvester::storage::{self, CaptchaStore};
use captcha_harvester::{pipeline, service};

/// CaptchaHarvester - Bulk captcha capture and recognition pipeline
#[derive(Parser, Debug)]
#[command(name = "captcha-harvester")]
#[command(about = "Captures captcha images, recognizes them with an ONNX model, stores results in SQLite")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the line-oriented stdin/stdout recognition service
    #[arg(long)]
    service: bool,

    /// Directory of raw captcha images to replay through the pipeline
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// ONNX recognition model (overrides the configured path)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// SQLite database (overrides the configured path)
    #[arg(short, long)]
    database: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Stdout belongs to service-mode responses; all logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_or_default_config(args.config.as_deref())?;

    let model_path = args
        .model
        .clone()
        .or_else(|| config.recognition.model_path.clone())
        .context("no model path; pass --model or set recognition.model_path")?;
    let database_path = match args.database.clone().or_else(|| config.storage.database_path.clone()) {
        Some(path) => path,
        None => storage::default_database_path()?,
    };

    let engine = Arc::new(OnnxOcrEngine::load(&model_path)?);
    let store = CaptchaStore::open(&database_path)?;

    if args.service {
        let stop = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone())
            .context("could not install interrupt handler")?;
        return service::run(engine, store, stop);
    }

    let input_dir = args
        .input_dir
        .context("no capture source; pass --input-dir or use --service")?;

    let workers = config.capture.workers.max(1);
    let sources: Vec<Box<dyn CaptureSource>> = (0..workers)
        .map(|offset| {
            Box::new(DirectorySource::strided(&input_dir, offset, workers)) as Box<dyn CaptureSource>
        })
        .collect();

    info!("CaptchaHarvester starting: replaying {:?}", input_dir);
    let handle = pipeline::start(&config, sources, engine, store);

    // An interrupt stops capture; queued work still drains and flushes.
    signal_hook::flag::register(signal_hook::consts::SIGINT, handle.cancel_flag())
        .context("could not install interrupt handler")?;

    let summary = handle.wait();

    info!(
        "Run complete: {} captured, {} recognized ({} low confidence, {} engine failures), {} persisted",
        summary.captured,
        summary.recognized,
        summary.low_confidence,
        summary.engine_failures,
        summary.persisted
    );

    Ok(())
}

/// Load configuration from the given file or fall back to defaults
fn load_or_default_config(path: Option<&std::path::Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let config = config::load_config(path)
                .with_context(|| format!("could not load config from {path:?}"))?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        None => {
            info!("Using default configuration");
            Ok(AppConfig::default())
        }
    }
}
