//! Turning detections into the explanations, counts and report shown on the page.
//!
use std::collections::HashMap;

use base64::prelude::*;
use common::protocol::{DescribedObject, Detection, DetectionReport, LabelCount, Thresholds};
use itertools::Itertools;
use lazy_static::lazy_static;

/// Shown for labels without an entry in the description table.
pub const FALLBACK_DESCRIPTION: &str = "🔹 Object detected, no further information available.";

lazy_static! {
    static ref OBJECT_DESCRIPTIONS: HashMap<&'static str, &'static str> = HashMap::from([
        (
            "person",
            "👤 A person was detected. Useful for security analysis or counting visitors.",
        ),
        (
            "car",
            "🚗 Vehicle detected. YOLO models are also used in smart traffic systems.",
        ),
        (
            "dog",
            "🐶 It is a dog. Detection is useful for monitoring urban wildlife.",
        ),
        (
            "cat",
            "🐱 Cat detected. Models like this can help with rescues and adoptions.",
        ),
        (
            "bottle",
            "🥤 Bottle detected. A common application in automated recycling.",
        ),
        (
            "cell phone",
            "📱 Phone detected. Common in analysing customer behaviour in shops.",
        ),
        (
            "chair",
            "🪑 Chair detected. Used in interior design or counting furniture.",
        ),
    ]);
}

/// Explanation for a label, or the fallback if there is none.
pub fn describe(label: &str) -> &'static str {
    OBJECT_DESCRIPTIONS
        .get(label)
        .copied()
        .unwrap_or(FALLBACK_DESCRIPTION)
}

/// Label with its first letter in upper case and the rest in lower case.
pub fn title(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Labels of the detections in detection order.
///
/// Class ids without an entry in `names` are not guessed at. They are returned separately.
pub fn resolve_labels<'a>(
    names: &'a [String],
    detections: &[Detection],
) -> (Vec<&'a str>, Vec<f32>) {
    let mut labels = Vec::with_capacity(detections.len());
    let mut unresolved = vec![];

    for detection in detections.iter() {
        match detection.class_index().and_then(|index| names.get(index)) {
            Some(name) => labels.push(name.as_str()),
            None => {
                log::warn!(
                    "Class id {} has no label among {} classes",
                    detection.class_id,
                    names.len()
                );
                unresolved.push(detection.class_id);
            }
        }
    }

    (labels, unresolved)
}

/// One described entry per distinct label, in order of first occurrence.
pub fn distinct_objects(labels: &[&str]) -> Vec<DescribedObject> {
    labels
        .iter()
        .unique()
        .map(|label| DescribedObject {
            label: label.to_string(),
            title: title(label),
            description: describe(label).to_string(),
        })
        .collect()
}

/// Number of detections per label, most frequent first.
///
/// Labels with the same count keep the order of their first occurrence.
pub fn frequency_table(labels: &[&str]) -> Vec<LabelCount> {
    labels
        .iter()
        .unique()
        .map(|label| LabelCount {
            label: label.to_string(),
            count: labels.iter().filter(|other| *other == label).count(),
        })
        .sorted_by(|a, b| b.count.cmp(&a.count))
        .collect()
}

/// Assemble everything rendered for one captured frame.
pub fn build_report(
    names: &[String],
    frame_size: (u32, u32),
    thresholds: Thresholds,
    detections: Vec<Detection>,
    annotated_jpeg: Option<&[u8]>,
) -> DetectionReport {
    let (labels, unresolved_class_ids) = resolve_labels(names, &detections);

    DetectionReport {
        width: frame_size.0,
        height: frame_size.1,
        thresholds,
        objects: distinct_objects(&labels),
        counts: frequency_table(&labels),
        unresolved_class_ids,
        annotated_jpeg: annotated_jpeg.map(|jpeg| BASE64_STANDARD.encode(jpeg)),
        detections,
    }
}
