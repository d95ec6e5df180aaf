//! Optional visual overlay for a running session.
//!
//! A sink sees every frame together with its thresholded detections and can ask
//! the session to stop. Rendering problems are the sink's own: the session logs
//! them and keeps going.
//!
//! Boxes are drawn as outlines only, without a class caption: the crate carries
//! no font rasterizer. The class names for each frame are in the session's
//! debug log and in `detect_once --json`.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::{Detection, DetectionResult};
use crate::frame::Frame;

const SNAPSHOT_JPEG_QUALITY: u8 = 90;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayControl {
    Continue,
    /// Stop the session without closing the window.
    Quit,
}

pub trait OverlaySink: Send {
    fn render(&mut self, frame: &Frame, result: &DetectionResult) -> Result<OverlayControl>;
}

/// Writes the latest annotated frame to a JPEG file.
///
/// The file is replaced atomically so a viewer polling it never reads a partial
/// image. Setting the shared quit flag ends the session at the next frame.
pub struct SnapshotOverlay {
    path: PathBuf,
    quit: Arc<AtomicBool>,
    frames_written: u64,
}

impl SnapshotOverlay {
    pub fn new(path: impl Into<PathBuf>, quit: Arc<AtomicBool>) -> Self {
        Self {
            path: path.into(),
            quit,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write_snapshot(&self, image: RgbImage, sequence: u64) -> Result<()> {
        let jpeg = Frame::from_rgb_image(image, sequence).encode_jpeg(SNAPSHOT_JPEG_QUALITY)?;
        let tmp = self.path.with_extension("jpg.tmp");
        std::fs::write(&tmp, jpeg)
            .with_context(|| format!("write overlay snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace overlay snapshot {}", self.path.display()))?;
        Ok(())
    }
}

impl OverlaySink for SnapshotOverlay {
    fn render(&mut self, frame: &Frame, result: &DetectionResult) -> Result<OverlayControl> {
        if self.quit.load(Ordering::SeqCst) {
            return Ok(OverlayControl::Quit);
        }
        let mut image = frame.to_rgb_image()?;
        for detection in &result.detections {
            draw_box(&mut image, detection);
        }
        self.write_snapshot(image, frame.sequence)?;
        self.frames_written += 1;
        Ok(OverlayControl::Continue)
    }
}

/// Sink that draws nothing and only relays the quit flag.
pub struct QuitSignal {
    quit: Arc<AtomicBool>,
}

impl QuitSignal {
    pub fn new(quit: Arc<AtomicBool>) -> Self {
        Self { quit }
    }
}

impl OverlaySink for QuitSignal {
    fn render(&mut self, _frame: &Frame, _result: &DetectionResult) -> Result<OverlayControl> {
        if self.quit.load(Ordering::SeqCst) {
            Ok(OverlayControl::Quit)
        } else {
            Ok(OverlayControl::Continue)
        }
    }
}

/// Outline a centre-based detection box, clipped to the image. No label text.
pub fn draw_box(image: &mut RgbImage, detection: &Detection) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let (left, top, right, bottom) = detection.bounds();
    let clamp = |value: f32, max: u32| -> u32 { value.max(0.0).min((max - 1) as f32) as u32 };
    let (x0, x1) = (clamp(left, width), clamp(right, width));
    let (y0, y1) = (clamp(top, height), clamp(bottom, height));
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for offset in 0..BOX_THICKNESS {
        let top_row = (y0 + offset).min(y1);
        let bottom_row = y1.saturating_sub(offset).max(y0);
        for x in x0..=x1 {
            image.put_pixel(x, top_row, BOX_COLOR);
            image.put_pixel(x, bottom_row, BOX_COLOR);
        }
        let left_col = (x0 + offset).min(x1);
        let right_col = x1.saturating_sub(offset).max(x0);
        for y in y0..=y1 {
            image.put_pixel(left_col, y, BOX_COLOR);
            image.put_pixel(right_col, y, BOX_COLOR);
        }
    }
}
