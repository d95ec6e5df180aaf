//! detect_once - run a single detection session from the command line.
//!
//! Useful for checking camera placement and thresholds without the trigger
//! server. With `--overlay` the latest annotated frame is written to a JPEG
//! file while the session runs; Ctrl-C ends the session early.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wear_tracker::{
    BackendKind, CatalogApi, DryRunCatalog, HttpCatalogApi, HttpCatalogConfig, OverlaySink,
    QuitSignal, SnapshotOverlay, Station, StationConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run one clothing detection session and report the confirmed garments"
)]
struct Args {
    /// Detector backend: hosted, tract or scripted.
    #[arg(long, env = "WEAR_DETECTOR_BACKEND")]
    backend: Option<String>,

    /// Stream URL (`http://` MJPEG, `stub://` synthetic, or a directory of JPEGs).
    #[arg(long, env = "WEAR_STREAM_URL")]
    stream_url: Option<String>,

    /// Write the latest annotated frame to this JPEG file.
    #[arg(long, env = "WEAR_OVERLAY_PATH")]
    overlay: Option<PathBuf>,

    /// Read the catalog but never write wash counts or worn items.
    #[arg(long)]
    dry_run: bool,

    /// Print the session outcome as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = StationConfig::load_unvalidated()?;
    if let Some(backend) = &args.backend {
        config.detector.backend = backend.parse::<BackendKind>()?;
    }
    if let Some(url) = &args.stream_url {
        config.stream.url = url.clone();
    }
    config.validate()?;

    let http: Arc<dyn CatalogApi> = Arc::new(HttpCatalogApi::new(HttpCatalogConfig {
        base_url: config.backend.base_url(),
        timeout: config.backend.timeout,
        device_id: config.backend.device_id.clone(),
        token: config.backend.token.clone(),
    })?);
    let api: Arc<dyn CatalogApi> = if args.dry_run {
        Arc::new(DryRunCatalog::new(Some(http)))
    } else {
        http
    };
    let station = Station::from_config_with_api(&config, api)?;

    let quit = Arc::new(AtomicBool::new(false));
    let quit_handler = quit.clone();
    ctrlc::set_handler(move || {
        quit_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut overlay: Box<dyn OverlaySink> = match &args.overlay {
        Some(path) => {
            log::info!("writing overlay frames to {}", path.display());
            Box::new(SnapshotOverlay::new(path, quit))
        }
        None => Box::new(QuitSignal::new(quit)),
    };
    let outcome = station.trigger(Some(overlay.as_mut()));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("stopped: {} after {} frames", outcome.stop_reason, outcome.frames);
        if outcome.confirmed.is_empty() {
            println!("no garments confirmed");
        }
        for name in &outcome.confirmed {
            println!("worn: {}", name);
        }
        for (name, wears) in &outcome.report.pushed {
            println!("wash count: {} -> {}", name, wears);
        }
        for name in &outcome.report.failed_pushes {
            println!("wash count update failed: {}", name);
        }
        for name in &outcome.report.due_for_wash {
            println!("due for wash: {}", name);
        }
    }
    Ok(())
}
