use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult, DetectionThresholds};
use crate::frame::Frame;

/// Replays a fixed script of per-frame label batches, cycling when it runs out.
///
/// Used for dry runs of the station without a model and for tests. Every
/// scripted detection is reported at full confidence with its own box, so
/// repeated labels within one batch survive suppression.
pub struct ScriptedBackend {
    script: Vec<Vec<String>>,
    cursor: usize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<String>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// A backend that never detects anything.
    pub fn idle() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        _thresholds: &DetectionThresholds,
    ) -> Result<DetectionResult> {
        if self.script.is_empty() {
            self.cursor += 1;
            return Ok(DetectionResult::default());
        }
        let batch = &self.script[self.cursor % self.script.len()];
        self.cursor += 1;

        let slot_width = frame.width.max(1) as f32 / batch.len().max(1) as f32;
        let detections = batch
            .iter()
            .enumerate()
            .map(|(slot, label)| Detection {
                class_name: label.clone(),
                confidence: 1.0,
                x: slot_width * (slot as f32 + 0.5),
                y: frame.height as f32 / 2.0,
                width: slot_width * 0.5,
                height: frame.height.max(1) as f32 / 2.0,
            })
            .collect();
        Ok(DetectionResult::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(batch: &[&str]) -> Vec<String> {
        batch.iter().map(|label| label.to_string()).collect()
    }

    #[test]
    fn cycles_through_script() {
        let mut backend =
            ScriptedBackend::new(vec![labels(&["Blue Hoodie"]), labels(&["Gray Sweatpants"])]);
        let frame = Frame::new(vec![0u8; 640 * 360 * 3], 640, 360, 1);
        let thresholds = DetectionThresholds::default();

        let seen: Vec<Vec<String>> = (0..3)
            .map(|_| backend.detect(&frame, &thresholds).unwrap().labels())
            .collect();
        assert_eq!(
            seen,
            vec![
                labels(&["Blue Hoodie"]),
                labels(&["Gray Sweatpants"]),
                labels(&["Blue Hoodie"]),
            ]
        );
    }

    #[test]
    fn repeated_labels_do_not_overlap() {
        let mut backend = ScriptedBackend::new(vec![labels(&["Blue Hoodie", "Blue Hoodie"])]);
        let frame = Frame::new(vec![0u8; 640 * 360 * 3], 640, 360, 1);
        let thresholds = DetectionThresholds::default();
        let result = backend.detect(&frame, &thresholds).unwrap();
        assert_eq!(result.detections[0].iou(&result.detections[1]), 0.0);
        assert_eq!(result.filtered(&thresholds).detections.len(), 2);
    }

    #[test]
    fn idle_backend_detects_nothing() {
        let mut backend = ScriptedBackend::idle();
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1);
        assert!(backend
            .detect(&frame, &DetectionThresholds::default())
            .unwrap()
            .is_empty());
    }
}
