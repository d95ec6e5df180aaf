/// Thresholds every backend result is held to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionThresholds {
    /// Minimum confidence (0..1) for a detection to count.
    pub confidence: f32,
    /// Non-max suppression overlap (IoU, 0..1). Same-class boxes overlapping a
    /// stronger box by more than this are dropped.
    pub overlap: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            confidence: 0.80,
            overlap: 0.30,
        }
    }
}

impl DetectionThresholds {
    /// Confidence as the integer percentage hosted inference APIs expect.
    pub fn confidence_percent(&self) -> u32 {
        to_percent(self.confidence)
    }

    pub fn overlap_percent(&self) -> u32 {
        to_percent(self.overlap)
    }
}

/// Result of running detection on a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

/// One labelled box. Coordinates are in frame pixels, `x`/`y` at the box centre.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Left, top, right, bottom.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        (
            self.x - half_w,
            self.y - half_h,
            self.x + half_w,
            self.y + half_h,
        )
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let (l1, t1, r1, b1) = self.bounds();
        let (l2, t2, r2, b2) = other.bounds();
        let inter_w = (r1.min(r2) - l1.max(l2)).max(0.0);
        let inter_h = (b1.min(b2) - t1.max(t2)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Class labels, one per detection, strongest first after `filtered`.
    pub fn labels(&self) -> Vec<String> {
        self.detections
            .iter()
            .map(|detection| detection.class_name.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Drop detections under the confidence threshold, then suppress overlaps.
    pub fn filtered(self, thresholds: &DetectionThresholds) -> Self {
        let confident = self
            .detections
            .into_iter()
            .filter(|detection| detection.confidence.is_finite())
            .filter(|detection| detection.confidence >= thresholds.confidence)
            .collect();
        Self {
            detections: non_max_suppression(confident, thresholds.overlap),
        }
    }
}

/// Per-class greedy non-max suppression.
///
/// Output is ordered by descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, overlap: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|existing| {
            existing.class_name == candidate.class_name && existing.iou(&candidate) > overlap
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn to_percent(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_name: &str, confidence: f32, x: f32, y: f32) -> Detection {
        Detection {
            class_name: class_name.to_string(),
            confidence,
            x,
            y,
            width: 100.0,
            height: 100.0,
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = det("Blue Hoodie", 0.9, 50.0, 50.0);
        let b = det("Blue Hoodie", 0.9, 500.0, 500.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn nms_suppresses_same_class_overlaps_only() {
        let detections = vec![
            det("Blue Hoodie", 0.85, 55.0, 50.0),
            det("Blue Hoodie", 0.95, 50.0, 50.0),
            det("Gray Sweatpants", 0.90, 52.0, 50.0),
            det("Blue Hoodie", 0.88, 400.0, 50.0),
        ];
        let kept = non_max_suppression(detections, 0.30);
        let labels: Vec<_> = kept.iter().map(|d| (d.class_name.as_str(), d.confidence)).collect();
        assert_eq!(
            labels,
            vec![
                ("Blue Hoodie", 0.95),
                ("Gray Sweatpants", 0.90),
                ("Blue Hoodie", 0.88),
            ]
        );
    }

    #[test]
    fn filtered_applies_confidence_before_nms() {
        let result = DetectionResult::new(vec![
            det("Yellow T-Shirt", 0.79, 50.0, 50.0),
            det("Yellow T-Shirt", 0.80, 52.0, 50.0),
            det("Navy Sweatpants", f32::NAN, 300.0, 300.0),
        ]);
        let filtered = result.filtered(&DetectionThresholds::default());
        assert_eq!(filtered.labels(), vec!["Yellow T-Shirt".to_string()]);
        assert_eq!(filtered.detections[0].confidence, 0.80);
    }

    #[test]
    fn thresholds_convert_to_percent() {
        let thresholds = DetectionThresholds::default();
        assert_eq!(thresholds.confidence_percent(), 80);
        assert_eq!(thresholds.overlap_percent(), 30);
    }
}
