//! wear_stationd - clothing detection station daemon
//!
//! This daemon:
//! 1. Loads the station config (`WEAR_CONFIG` file plus env overrides)
//! 2. Loads the detector once
//! 3. Serves the trigger API; each `POST /trigger-detection` runs one session
//! 4. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use wear_tracker::{
    api::{ApiConfig, ApiServer},
    Station, StationConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = StationConfig::load()?;
    log::info!(
        "wear_stationd {} stream={} detector={} backend={}",
        env!("CARGO_PKG_VERSION"),
        config.stream.url,
        config.detector.backend,
        config.backend.base_url()
    );

    let station = Arc::new(Station::from_config(&config)?);
    let api_config = ApiConfig {
        addr: config.server.addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, station).spawn()?;
    log::info!("trigger api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("wear_stationd waiting for triggers (Ctrl-C to stop)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping trigger api...");
    api_handle.stop()?;

    Ok(())
}
