//! Garment detection.
//!
//! `DetectorBackend` implementations wrap a pretrained model; `Detector` holds one
//! backend plus the confidence/overlap thresholds and guarantees every result it
//! hands out has had both applied, whichever backend produced it.

mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

use crate::config::{BackendKind, DetectorSettings};
use crate::frame::Frame;
use crate::window::Vocabulary;

pub use backend::DetectorBackend;
pub use backends::{HostedBackend, HostedConfig, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{non_max_suppression, Detection, DetectionResult, DetectionThresholds};

/// A loaded model plus the thresholds its output is held to.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    thresholds: DetectionThresholds,
}

impl Detector {
    pub fn new(backend: Box<dyn DetectorBackend>, thresholds: DetectionThresholds) -> Self {
        Self {
            backend,
            thresholds,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        self.thresholds
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// Run the backend and return the thresholded, de-duplicated detections.
    pub fn detect_full(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let raw = self.backend.detect(frame, &self.thresholds)?;
        Ok(raw.filtered(&self.thresholds))
    }

    /// Class labels for every detection that passed the thresholds.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<String>> {
        Ok(self.detect_full(frame)?.labels())
    }
}

/// Build the configured backend and wrap it in a `Detector`.
pub fn build_detector(settings: &DetectorSettings, vocabulary: &Vocabulary) -> Result<Detector> {
    let backend: Box<dyn DetectorBackend> = match settings.backend {
        BackendKind::Hosted => {
            let api_key = settings
                .api_key
                .clone()
                .ok_or_else(|| anyhow!("hosted detector requires an API key (ROBOFLOW_API_KEY)"))?;
            Box::new(HostedBackend::new(HostedConfig {
                api_url: settings.api_url.clone(),
                model_id: settings.model_id.clone(),
                api_key,
                timeout: settings.request_timeout,
            }))
        }
        BackendKind::Scripted => {
            if settings.script.is_empty() {
                Box::new(ScriptedBackend::idle())
            } else {
                Box::new(ScriptedBackend::new(settings.script.clone()))
            }
        }
        BackendKind::Tract => build_tract(settings, vocabulary)?,
    };
    log::info!(
        "detector backend={} confidence={:.2} overlap={:.2}",
        backend.name(),
        settings.thresholds.confidence,
        settings.thresholds.overlap
    );
    Ok(Detector::new(backend, settings.thresholds))
}

#[cfg(feature = "backend-tract")]
fn build_tract(
    settings: &DetectorSettings,
    vocabulary: &Vocabulary,
) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires a model path (WEAR_MODEL_PATH)"))?;
    let class_names = if settings.class_names.is_empty() {
        vocabulary.names().map(str::to_string).collect()
    } else {
        settings.class_names.clone()
    };
    let backend = TractBackend::new(
        model_path,
        settings.model_input_width,
        settings.model_input_height,
        class_names,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(
    _settings: &DetectorSettings,
    _vocabulary: &Vocabulary,
) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "tract detector requires the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoisyBackend;

    impl DetectorBackend for NoisyBackend {
        fn name(&self) -> &'static str {
            "noisy"
        }

        fn detect(
            &mut self,
            _frame: &Frame,
            _thresholds: &DetectionThresholds,
        ) -> Result<DetectionResult> {
            let boxed = |class_name: &str, confidence: f32, x: f32| Detection {
                class_name: class_name.to_string(),
                confidence,
                x,
                y: 100.0,
                width: 80.0,
                height: 120.0,
            };
            Ok(DetectionResult::new(vec![
                boxed("Blue Hoodie", 0.93, 100.0),
                boxed("Blue Hoodie", 0.91, 104.0),
                boxed("Gray Sweatpants", 0.40, 100.0),
                boxed("White Sweatpants", 0.88, 300.0),
            ]))
        }
    }

    #[test]
    fn detector_enforces_thresholds_on_any_backend() {
        let mut detector = Detector::new(Box::new(NoisyBackend), DetectionThresholds::default());
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1);
        let labels = detector.detect(&frame).unwrap();
        assert_eq!(labels, vec!["Blue Hoodie", "White Sweatpants"]);
        assert_eq!(detector.backend_name(), "noisy");
    }

    #[test]
    fn hosted_backend_requires_api_key() {
        let settings = DetectorSettings {
            backend: BackendKind::Hosted,
            api_key: None,
            ..DetectorSettings::default()
        };
        assert!(build_detector(&settings, &Vocabulary::default()).is_err());
    }

    #[test]
    fn scripted_backend_builds_without_credentials() {
        let settings = DetectorSettings {
            backend: BackendKind::Scripted,
            script: vec![vec!["Blue Hoodie".to_string()]],
            ..DetectorSettings::default()
        };
        let mut detector = build_detector(&settings, &Vocabulary::default()).unwrap();
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1);
        assert_eq!(detector.detect(&frame).unwrap(), vec!["Blue Hoodie"]);
    }
}
