use anyhow::Result;

use crate::detect::result::{DetectionResult, DetectionThresholds};
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one pretrained garment-detection model. Backends may apply
/// the thresholds themselves (hosted APIs take them as request parameters) but
/// are not required to: `Detector` re-applies both before results are used.
///
/// Backends must treat the frame as read-only and must not retain it past the call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, thresholds: &DetectionThresholds)
        -> Result<DetectionResult>;

    /// Optional warm-up hook, run once when the station starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
