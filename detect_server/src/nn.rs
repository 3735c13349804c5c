//! Object detection network.
//!
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use common::protocol::{Detection, Thresholds};
use image::{imageops::FilterType, Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::annotate::Annotator;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Weights loaded when nothing else is configured.
pub const DEFAULT_MODEL_PATH: &str = "yolov5s.onnx";

/// Side length of the square network input.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Upper bound of detections kept after non-maximum suppression.
const MAX_DETECTIONS: usize = 1000;

/// Grey value of the letterbox border.
const LETTERBOX_FILL: u8 = 114;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Class names of the COCO dataset the stock YOLOv5 weights are trained on.
pub const COCO_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// A loaded detector.
///
/// Implementations are shared between requests, so `run` and `render` only take `&self`.
pub trait InferModel: Send + Sync {
    /// Class names indexed by class id.
    fn names(&self) -> &[String];

    /// Detect objects in a frame.
    fn run(&self, frame: &RgbImage, thresholds: Thresholds) -> Result<Vec<Detection>>;

    /// Draw detections onto the frame they were found in.
    fn render(&self, frame: &mut RgbImage, detections: &[Detection]);
}

/// Options applied when loading a detector.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub input_size: u32,
    /// File with one class name per line. COCO names are used if unset.
    pub labels: Option<PathBuf>,
    /// TrueType font for box captions. The bundled font is used if unset.
    pub font: Option<PathBuf>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            labels: None,
            font: None,
        }
    }
}

/// YOLOv5 network exported to ONNX.
pub struct YoloV5Model {
    model: NnModel,
    input_size: u32,
    names: Vec<String>,
    annotator: Annotator,
}

impl YoloV5Model {
    pub fn load(path: impl AsRef<Path>, options: &ModelOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("weights file {} not found", path.display());
        }
        if options.input_size == 0 {
            bail!("input size must be positive");
        }

        let names = match &options.labels {
            Some(labels) => read_labels(labels)?,
            None => COCO_NAMES.iter().map(|name| name.to_string()).collect(),
        };
        let model = get_yolo_model(path, options.input_size)?;
        let annotator = Annotator::new(options.font.as_deref());

        Ok(Self {
            model,
            input_size: options.input_size,
            names,
            annotator,
        })
    }

    fn preproc(&self, frame: &RgbImage) -> (Tensor, Letterbox) {
        let size = self.input_size;
        let letterbox = Letterbox::fit(frame.width(), frame.height(), size);

        let resized: RgbImage = image::imageops::resize(
            frame,
            letterbox.width,
            letterbox.height,
            FilterType::Triangle,
        );
        let mut padded = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
        image::imageops::replace(
            &mut padded,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| padded[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into();

        (tensor, letterbox)
    }
}

impl InferModel for YoloV5Model {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn run(&self, frame: &RgbImage, thresholds: Thresholds) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.preproc(frame);
        let raw_nn_out = self.model.run(tvec!(input.into()))?;
        decode_output(&raw_nn_out[0], &letterbox, frame.dimensions(), thresholds)
    }

    fn render(&self, frame: &mut RgbImage, detections: &[Detection]) {
        self.annotator.draw(frame, detections, &self.names);
    }
}

/// Decode the raw `[1, candidates, 5 + classes]` network output.
///
/// Each row holds the box center, box size, objectness and one score per class, all in
/// letterboxed input coordinates.
fn decode_output(
    raw_nn_out: &Tensor,
    letterbox: &Letterbox,
    frame_size: (u32, u32),
    thresholds: Thresholds,
) -> Result<Vec<Detection>> {
    let shape = raw_nn_out.shape();
    if shape.len() != 3 || shape[2] < 6 {
        bail!("unexpected network output shape {:?}", shape);
    }

    let rows: Vec<f32> = raw_nn_out.to_array_view::<f32>()?.iter().cloned().collect();
    let mut candidates: Vec<Candidate> = rows
        .chunks(shape[2])
        .filter_map(|row| Candidate::from_row(row, thresholds.confidence()))
        .collect();

    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let selected = non_maximum_suppression(candidates, thresholds.iou(), MAX_DETECTIONS);

    let (width, height) = (frame_size.0 as f32, frame_size.1 as f32);
    let detections = selected
        .into_iter()
        .map(|candidate| {
            let (x_tl, y_tl) = letterbox.to_frame(candidate.bbox[0], candidate.bbox[1]);
            let (x_br, y_br) = letterbox.to_frame(candidate.bbox[2], candidate.bbox[3]);
            let bbox = [
                x_tl.clamp(0.0, width),
                y_tl.clamp(0.0, height),
                x_br.clamp(0.0, width),
                y_br.clamp(0.0, height),
            ];
            Detection::new(bbox, candidate.confidence, candidate.class as f32)
        })
        .collect();

    Ok(detections)
}

fn get_yolo_model(path: &Path, input_size: u32) -> Result<NnModel> {
    let size = input_size as usize;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to read ONNX model {}", path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

fn read_labels(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    let names: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if names.is_empty() {
        bail!("labels file {} has no entries", path.display());
    }

    Ok(names)
}

/// Placement of a frame inside the square network input.
///
/// The frame is scaled to fit while keeping its aspect ratio and centered on a grey border.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(frame_width: u32, frame_height: u32, size: u32) -> Self {
        let scale = f32::min(
            size as f32 / frame_width as f32,
            size as f32 / frame_height as f32,
        );
        let width = ((frame_width as f32 * scale).round() as u32).clamp(1, size);
        let height = ((frame_height as f32 * scale).round() as u32).clamp(1, size);

        Self {
            scale,
            width,
            height,
            pad_x: (size - width) / 2,
            pad_y: (size - height) / 2,
        }
    }

    /// Map a point of the network input back onto the frame.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Detection candidate in network input coordinates.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    bbox: [f32; 4],
    confidence: f32,
    class: usize,
}

impl Candidate {
    fn from_row(row: &[f32], min_confidence: f32) -> Option<Self> {
        let objectness = row[4];
        if objectness <= min_confidence {
            return None;
        }

        let (class, class_score) = row[5..]
            .iter()
            .cloned()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        let confidence = class_score * objectness;
        if confidence <= min_confidence {
            return None;
        }

        let (center_x, center_y, half_w, half_h) = (row[0], row[1], row[2] / 2.0, row[3] / 2.0);
        Some(Self {
            bbox: [
                center_x - half_w,
                center_y - half_h,
                center_x + half_w,
                center_y + half_h,
            ],
            confidence,
            class,
        })
    }
}

/// Run class-aware non-maximum-suppression on candidates sorted by ascending confidence.
///
/// Start with the most confident candidate and iterate over the others in the order of sinking
/// confidence. A candidate is kept only if it does not overlap more than `max_iou` with an
/// already selected candidate of the same class. Stops once `max_detections` are selected.
fn non_maximum_suppression(
    mut sorted_candidates: Vec<Candidate>,
    max_iou: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    let mut selected: Vec<Candidate> = vec![];
    'candidates: while selected.len() < max_detections {
        // Get next most confident candidate from the back of ascending-sorted vector.
        match sorted_candidates.pop() {
            Some(candidate) => {
                for chosen in selected.iter().filter(|chosen| chosen.class == candidate.class) {
                    if iou(&candidate.bbox, &chosen.bbox) > max_iou {
                        continue 'candidates;
                    }
                }

                selected.push(candidate)
            }
            None => break 'candidates,
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // If the boxes do not overlap, the overlap box is ill defined and its area is zero.
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// The bounding box is passed as four-element array defining two points:
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`
/// If the bottom-right point lies above or to the left of the top-left point, the area is zero.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod test {

    use super::*;

    fn candidate(bbox: [f32; 4], confidence: f32, class: usize) -> Candidate {
        Candidate {
            bbox,
            confidence,
            class,
        }
    }

    /// Row of a network output with `classes` class scores.
    fn row(bbox_center: [f32; 4], objectness: f32, class: usize, classes: usize) -> Vec<f32> {
        let mut row = vec![0.0; 5 + classes];
        row[..4].copy_from_slice(&bbox_center);
        row[4] = objectness;
        row[5 + class] = 1.0;
        row
    }

    #[test]
    fn test_bbox_area() {
        assert_eq!(bbox_area(&[0.0, 0.0, 2.0, 3.0]), 6.0);
        assert_eq!(bbox_area(&[2.0, 0.0, 0.0, 3.0]), 0.0);
    }

    #[test]
    fn test_iou() {
        let bbox = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-5);
        assert_eq!(iou(&bbox, &[20.0, 20.0, 30.0, 30.0]), 0.0);

        // Half of the box overlaps: 50 / (100 + 100 - 50)
        let shifted = [5.0, 0.0, 15.0, 10.0];
        assert!((iou(&bbox, &shifted) - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_nms_drops_overlapping_boxes_of_same_class() {
        let candidates = vec![
            candidate([1.0, 1.0, 11.0, 11.0], 0.6, 0),
            candidate([0.0, 0.0, 10.0, 10.0], 0.9, 0),
        ];

        let selected = non_maximum_suppression(candidates, 0.45, MAX_DETECTIONS);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].confidence, 0.9);
    }

    #[test]
    fn test_nms_keeps_overlapping_boxes_of_other_classes() {
        let candidates = vec![
            candidate([1.0, 1.0, 11.0, 11.0], 0.6, 1),
            candidate([0.0, 0.0, 10.0, 10.0], 0.9, 0),
        ];

        let selected = non_maximum_suppression(candidates, 0.45, MAX_DETECTIONS);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let candidates = vec![
            candidate([20.0, 20.0, 30.0, 30.0], 0.5, 0),
            candidate([0.0, 0.0, 10.0, 10.0], 0.9, 0),
        ];

        let selected = non_maximum_suppression(candidates, 0.0, MAX_DETECTIONS);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_nms_stops_at_max_detections() {
        let candidates: Vec<Candidate> = (0..50)
            .map(|i| {
                let x = i as f32 * 20.0;
                candidate([x, 0.0, x + 10.0, 10.0], i as f32 / 100.0, 0)
            })
            .collect();

        let selected = non_maximum_suppression(candidates, 0.45, 10);
        assert_eq!(selected.len(), 10);
        // The most confident candidates are the ones kept
        assert_eq!(selected[0].confidence, 0.49);
        assert_eq!(selected[9].confidence, 0.40);
    }

    #[test]
    fn test_candidate_from_row() {
        let accepted = Candidate::from_row(&row([50.0, 40.0, 20.0, 10.0], 0.8, 2, 3), 0.25);
        assert_eq!(accepted, Some(candidate([40.0, 35.0, 60.0, 45.0], 0.8, 2)));

        let low_objectness = Candidate::from_row(&row([50.0, 40.0, 20.0, 10.0], 0.2, 2, 3), 0.25);
        assert_eq!(low_objectness, None);
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        // 1280x720 scaled by 0.5 to 640x360, padded by 140 rows above and below
        let letterbox = Letterbox::fit(1280, 720, 640);
        assert_eq!(letterbox.width, 640);
        assert_eq!(letterbox.height, 360);
        assert_eq!((letterbox.pad_x, letterbox.pad_y), (0, 140));

        let (x, y) = letterbox.to_frame(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_output() -> Result<()> {
        let rows = [
            row([100.0, 100.0, 40.0, 40.0], 0.9, 0, 3),
            row([102.0, 100.0, 40.0, 40.0], 0.7, 0, 3),
            row([400.0, 300.0, 20.0, 60.0], 0.6, 2, 3),
            row([500.0, 500.0, 10.0, 10.0], 0.1, 1, 3),
        ]
        .concat();
        let raw: Tensor = tract_ndarray::Array3::from_shape_vec((1, 4, 8), rows)?.into();
        let letterbox = Letterbox::fit(640, 640, 640);

        let detections = decode_output(&raw, &letterbox, (640, 640), Thresholds::default())?;

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_index(), Some(0));
        assert_eq!(detections[0].bbox, [80.0, 80.0, 120.0, 120.0]);
        assert_eq!(detections[1].class_index(), Some(2));
        assert_eq!(detections[1].bbox, [390.0, 270.0, 410.0, 330.0]);
        Ok(())
    }

    #[test]
    fn test_decode_output_rejects_unexpected_shape() -> Result<()> {
        let raw: Tensor = tract_ndarray::Array2::<f32>::zeros((4, 8)).into();
        let letterbox = Letterbox::fit(640, 640, 640);

        assert!(decode_output(&raw, &letterbox, (640, 640), Thresholds::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_load_rejects_zero_input_size() -> Result<()> {
        let path = std::env::temp_dir().join("detect_server_zero_input_size.onnx");
        fs::write(&path, b"not a model")?;

        let options = ModelOptions {
            input_size: 0,
            ..Default::default()
        };
        let result = YoloV5Model::load(&path, &options);
        fs::remove_file(&path).ok();

        let err = result.err().expect("zero input size must fail");
        assert!(err.to_string().contains("input size"));
        Ok(())
    }

    #[test]
    fn test_load_missing_weights() {
        let result = YoloV5Model::load("does/not/exist.onnx", &ModelOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_read_labels_skips_blank_lines() -> Result<()> {
        let path = std::env::temp_dir().join("detect_server_labels_test.txt");
        fs::write(&path, "person\n\n bicycle \ncar\n")?;

        let names = read_labels(&path)?;
        fs::remove_file(&path).ok();

        assert_eq!(names, vec!["person", "bicycle", "car"]);
        Ok(())
    }
}
