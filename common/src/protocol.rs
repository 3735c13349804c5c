//! Types exchanged between the detect server and its clients.
//!
use serde::{Deserialize, Serialize};

/// Default minimum score to keep a candidate detection.
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
/// Default overlap above which non-maximum suppression drops the weaker box.
pub const DEFAULT_IOU: f32 = 0.45;
/// Granularity of the threshold sliders.
pub const THRESHOLD_STEP: f32 = 0.01;

/// Confidence and IoU thresholds applied to one inference call.
///
/// Both values live in `[0.0, 1.0]`. Out-of-range input is clamped, NaN falls back to the
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Thresholds {
    confidence: f32,
    iou: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        }
    }
}

impl Thresholds {
    pub fn new(confidence: f32, iou: f32) -> Self {
        Self {
            confidence: clamp_unit(confidence, DEFAULT_CONFIDENCE),
            iou: clamp_unit(iou, DEFAULT_IOU),
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn iou(&self) -> f32 {
        self.iou
    }
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// One detected object.
///
/// `bbox` is `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]` in pixels of the
/// captured frame. The class id is kept as the float the network produces.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: f32,
}

impl Detection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_id: f32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }

    /// Index into the class names, truncating the class id toward zero.
    ///
    /// Negative and non-finite ids have no index.
    pub fn class_index(&self) -> Option<usize> {
        match self.class_id {
            id if id.is_finite() && id >= 0.0 => Some(id as usize),
            _ => None,
        }
    }
}

/// A distinct detected label with its explanation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DescribedObject {
    pub label: String,
    pub title: String,
    pub description: String,
}

/// Number of detections carrying a label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Everything rendered for one captured frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectionReport {
    pub width: u32,
    pub height: u32,
    pub thresholds: Thresholds,
    pub detections: Vec<Detection>,
    /// Distinct labels in order of first occurrence.
    pub objects: Vec<DescribedObject>,
    /// Detections per label, most frequent first.
    pub counts: Vec<LabelCount>,
    /// Class ids that did not resolve to a known label.
    #[serde(default)]
    pub unresolved_class_ids: Vec<f32>,
    /// Base64 encoded JPEG of the annotated frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_jpeg: Option<String>,
}

/// State of the detector as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelStatus {
    pub model: String,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn test_threshold_defaults() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.confidence(), 0.25);
        assert_eq!(thresholds.iou(), 0.45);
    }

    #[test]
    fn test_thresholds_in_range_are_kept() {
        for step in 0..=100 {
            let value = step as f32 / 100.0;
            let thresholds = Thresholds::new(value, 1.0 - value);
            assert_eq!(thresholds.confidence(), value);
            assert_eq!(thresholds.iou(), 1.0 - value);
        }
    }

    #[test]
    fn test_thresholds_are_clamped() {
        let thresholds = Thresholds::new(-0.5, 3.0);
        assert_eq!(thresholds.confidence(), 0.0);
        assert_eq!(thresholds.iou(), 1.0);

        let thresholds = Thresholds::new(f32::NAN, f32::NAN);
        assert_eq!(thresholds, Thresholds::default());
    }

    #[test]
    fn test_class_index_truncates() {
        let detection = Detection::new([0.0; 4], 0.9, 2.7);
        assert_eq!(detection.class_index(), Some(2));

        let detection = Detection::new([0.0; 4], 0.9, -1.0);
        assert_eq!(detection.class_index(), None);

        let detection = Detection::new([0.0; 4], 0.9, f32::NAN);
        assert_eq!(detection.class_index(), None);
    }

    #[test]
    fn test_report_without_image_skips_field() -> Result<(), Error> {
        let report = DetectionReport {
            width: 4,
            height: 2,
            thresholds: Thresholds::default(),
            detections: vec![],
            objects: vec![],
            counts: vec![],
            unresolved_class_ids: vec![],
            annotated_jpeg: None,
        };

        let serialized = serde_json::to_string(&report)?;
        assert!(!serialized.contains("annotated_jpeg"));

        let deserialized: DetectionReport = serde_json::from_str(&serialized)?;
        assert_eq!(report, deserialized);

        Ok(())
    }
}
