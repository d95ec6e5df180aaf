//! Long-lived owner of the loaded detector and the catalog client.
//!
//! The detector is loaded once at startup and reused by every triggered
//! session. The detector lock is held for the whole session, so concurrent
//! triggers run one after another and never share a capture handle.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};

use crate::catalog::{CatalogApi, HttpCatalogApi, HttpCatalogConfig, RemoteCatalog};
use crate::config::{StationConfig, StreamSettings};
use crate::detect::{build_detector, Detector};
use crate::ingest::{open_source, FrameSource};
use crate::overlay::OverlaySink;
use crate::session::{Clock, DetectionSession, SessionOutcome, SessionSettings, SystemClock};

/// Builds a fresh, unopened source for each session.
pub type SourceFactory = Box<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;

pub struct Station {
    settings: SessionSettings,
    detector: Mutex<Detector>,
    catalog: RemoteCatalog,
    source_factory: SourceFactory,
    clock: Arc<dyn Clock>,
}

impl Station {
    pub fn new(
        settings: SessionSettings,
        detector: Detector,
        api: Arc<dyn CatalogApi>,
        source_factory: SourceFactory,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            detector: Mutex::new(detector),
            catalog: RemoteCatalog::new(api),
            source_factory,
            clock,
        }
    }

    /// Wire a station from config: configured detector, HTTP catalog, stream source.
    pub fn from_config(config: &StationConfig) -> Result<Self> {
        let api = HttpCatalogApi::new(HttpCatalogConfig {
            base_url: config.backend.base_url(),
            timeout: config.backend.timeout,
            device_id: config.backend.device_id.clone(),
            token: config.backend.token.clone(),
        })?;
        Self::from_config_with_api(config, Arc::new(api))
    }

    /// Like `from_config` but with a caller-supplied catalog, e.g. a dry-run wrapper.
    pub fn from_config_with_api(
        config: &StationConfig,
        api: Arc<dyn CatalogApi>,
    ) -> Result<Self> {
        let mut detector = build_detector(&config.detector, &config.vocabulary)?;
        detector.warm_up().context("detector warm-up failed")?;
        let stream = config.stream.clone();
        Ok(Self::new(
            SessionSettings {
                vocabulary: config.vocabulary.clone(),
                window: config.window,
            },
            detector,
            api,
            stream_factory(stream),
            Arc::new(SystemClock),
        ))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Run one detection session and return its outcome.
    ///
    /// Never fails: problems end the session early with an empty result and
    /// are reported through the log and `SessionOutcome::stop_reason`.
    pub fn trigger(&self, overlay: Option<&mut dyn OverlaySink>) -> SessionOutcome {
        let mut detector = self
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let source = match (self.source_factory)() {
            Ok(source) => source,
            Err(err) => {
                log::warn!("cannot build frame source: {:#}", err);
                return SessionOutcome::unavailable();
            }
        };

        let session = DetectionSession::new(
            source,
            &mut *detector,
            self.catalog.clone(),
            self.clock.as_ref(),
            &self.settings,
        );
        let outcome = match overlay {
            Some(overlay) => session.with_overlay(overlay).run(),
            None => session.run(),
        };
        log::info!(
            "trigger finished: {} ({} frames), detected {:?}",
            outcome.stop_reason,
            outcome.frames,
            outcome.confirmed
        );
        outcome
    }

    /// Proxy the backend's laundry list.
    pub fn laundry_list(&self) -> Result<serde_json::Value> {
        self.catalog.laundry_list()
    }
}

fn stream_factory(stream: StreamSettings) -> SourceFactory {
    Box::new(move || open_source(&stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DryRunCatalog;
    use crate::config::WindowSettings;
    use crate::detect::{DetectionThresholds, ScriptedBackend};
    use crate::session::StopReason;
    use crate::window::Vocabulary;
    use anyhow::anyhow;
    use std::time::Duration;

    fn idle_detector() -> Detector {
        Detector::new(Box::new(ScriptedBackend::idle()), DetectionThresholds::default())
    }

    #[test]
    fn factory_failure_is_source_unavailable() {
        let station = Station::new(
            SessionSettings::default(),
            idle_detector(),
            Arc::new(DryRunCatalog::new(None)),
            Box::new(|| Err(anyhow!("no camera configured"))),
            Arc::new(SystemClock),
        );
        let outcome = station.trigger(None);
        assert_eq!(outcome.stop_reason, StopReason::SourceUnavailable);
        assert!(outcome.confirmed.is_empty());
    }

    #[test]
    fn each_trigger_gets_a_fresh_source() {
        let settings = SessionSettings {
            vocabulary: Vocabulary::default(),
            window: WindowSettings {
                duration: Duration::from_millis(1),
                count_threshold: 10,
            },
        };
        let stream = StreamSettings {
            url: "stub://closet".to_string(),
            target_fps: 10,
            width: 16,
            height: 9,
            read_timeout: Duration::from_secs(1),
        };
        let station = Station::new(
            settings,
            idle_detector(),
            Arc::new(DryRunCatalog::new(None)),
            stream_factory(stream),
            Arc::new(SystemClock),
        );
        for _ in 0..2 {
            let outcome = station.trigger(None);
            assert_eq!(outcome.stop_reason, StopReason::WindowClosed);
            assert!(outcome.frames >= 1);
        }
    }
}
