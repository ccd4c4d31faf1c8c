//! PlateScan - License plate OCR with annotated output
//!
//! Scans an image from a file, URL, or built-in sample, outlines every
//! high-confidence text detection, and lists the transcribed plate text.

mod acquire;
mod annotate;
mod config;
mod ocr;
mod scan;
mod session;
mod ui;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::acquire::ImageSource;
use crate::config::AppConfig;
use crate::session::EMPTY_NOTICE;

/// PlateScan - License plate OCR
#[derive(Parser, Debug)]
#[command(name = "platescan")]
#[command(about = "Detect and transcribe license plate text with annotated output")]
struct Args {
    /// Scan a local image file and exit
    #[arg(short, long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Scan an image fetched from a URL and exit
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    /// Scan one of the built-in samples by name and exit
    #[arg(short, long, value_name = "NAME")]
    sample: Option<String>,

    /// Where to write the annotated image in one-shot mode
    #[arg(short, long, default_value = "annotated.png")]
    output: PathBuf,

    /// List the built-in sample images and exit
    #[arg(long)]
    list_samples: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_create_config();

    if args.list_samples {
        println!("Built-in samples:");
        for sample in &config.acquire.samples {
            println!("  {}  {}", sample.name, sample.url);
        }
        return Ok(());
    }

    let source = args
        .image
        .map(ImageSource::Upload)
        .or(args.url.map(ImageSource::Url))
        .or(args.sample.map(ImageSource::Sample));

    if let Some(source) = source {
        return run_one_shot(&source, &args.output, &config);
    }

    info!("PlateScan starting...");
    ui::run_app(config).map_err(|e| anyhow::anyhow!("UI error: {e}"))?;
    info!("PlateScan shutdown complete");

    Ok(())
}

/// Scan a single source, save the annotated image, print the results.
fn run_one_shot(source: &ImageSource, output: &PathBuf, config: &AppConfig) -> Result<()> {
    info!("Scanning {}", source.describe());

    let report = scan::scan_source(source, config)
        .map_err(|err| anyhow::anyhow!("{}", err.notice()))?;

    report.annotated.save(output)?;
    println!("Annotated image written to {}", output.display());

    if report.is_empty() {
        println!("{EMPTY_NOTICE}");
    } else {
        for result in &report.results {
            println!(
                "#{}  {}  (confidence {:.2})",
                result.index, result.text, result.confidence
            );
        }
    }
    println!("Scanned in {} ms", report.elapsed_ms);

    Ok(())
}

/// Load configuration from file or create default
fn load_or_create_config() -> AppConfig {
    if let Ok(config_dir) = config::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        } else if let Err(e) = config::save_config(&AppConfig::default(), &config_path) {
            info!("Could not write default configuration: {e}");
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
