#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult, DetectionThresholds};
use crate::frame::Frame;

/// Tract-based backend for a local YOLOv8-style ONNX export.
///
/// Expects a single output of shape `[1, 4 + classes, anchors]` with centre-based
/// boxes in model-input pixels followed by per-class scores. Boxes are scaled back
/// to frame pixels. Runs entirely on-device.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        if class_names.is_empty() {
            return Err(anyhow!("tract backend needs at least one class name"));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            class_names,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = frame.to_rgb_image()?;
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &Frame,
        thresholds: &DetectionThresholds,
    ) -> Result<DetectionResult> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] != 4 + self.class_names.len() {
            return Err(anyhow!(
                "unexpected model output shape {:?} for {} classes",
                shape,
                self.class_names.len()
            ));
        }

        let scale_x = frame.width as f32 / self.width as f32;
        let scale_y = frame.height as f32 / self.height as f32;
        let mut detections = Vec::new();
        for anchor in 0..shape[2] {
            let best = (0..self.class_names.len())
                .map(|class| (class, view[[0, 4 + class, anchor]]))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((class, score)) = best else {
                continue;
            };
            if score < thresholds.confidence {
                continue;
            }
            detections.push(Detection {
                class_name: self.class_names[class].clone(),
                confidence: score,
                x: view[[0, 0, anchor]] * scale_x,
                y: view[[0, 1, anchor]] * scale_y,
                width: view[[0, 2, anchor]] * scale_x,
                height: view[[0, 3, anchor]] * scale_y,
            });
        }
        Ok(DetectionResult::new(detections))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        thresholds: &DetectionThresholds,
    ) -> Result<DetectionResult> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, thresholds)
    }
}
