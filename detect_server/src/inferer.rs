//! One capture-to-report cycle.
//!
use std::time::Instant;

use anyhow::Result;
use common::protocol::{DetectionReport, Thresholds};

use crate::{
    annotate::encode_jpeg, capture::decode_capture, meter::METER, nn::InferModel,
    present::build_report,
};

/// Decode a captured still, detect objects in it and assemble the report.
///
/// A capture that does not decode is skipped and yields `None`; it never reaches the detector.
pub fn run_cycle(
    detector: &dyn InferModel,
    capture: &[u8],
    thresholds: Thresholds,
) -> Result<Option<DetectionReport>> {
    let mut frame = match decode_capture(capture) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("Skipping capture: {err}");
            return Ok(None);
        }
    };

    let start = Instant::now();
    let detections = detector.run(&frame, thresholds)?;
    METER.tick_inference(start.elapsed());
    log::debug!(
        "Found {} objects with confidence {:.2} and IoU {:.2} in {:.1} ms",
        detections.len(),
        thresholds.confidence(),
        thresholds.iou(),
        start.elapsed().as_secs_f32() * 1000.0
    );

    detector.render(&mut frame, &detections);
    let jpeg = encode_jpeg(&frame)?;

    Ok(Some(build_report(
        detector.names(),
        frame.dimensions(),
        thresholds,
        detections,
        Some(&jpeg),
    )))
}

#[cfg(test)]
mod test {

    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::protocol::Detection;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

    use super::*;

    /// Detector returning fixed detections and counting its calls.
    struct FixedModel {
        names: Vec<String>,
        detections: Vec<Detection>,
        runs: AtomicUsize,
    }

    impl FixedModel {
        fn new(detections: Vec<Detection>) -> Self {
            Self {
                names: vec!["person".into(), "bicycle".into(), "car".into()],
                detections,
                runs: AtomicUsize::new(0),
            }
        }
    }

    impl InferModel for FixedModel {
        fn names(&self) -> &[String] {
            &self.names
        }

        fn run(&self, _frame: &RgbImage, _thresholds: Thresholds) -> Result<Vec<Detection>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }

        fn render(&self, _frame: &mut RgbImage, _detections: &[Detection]) {}
    }

    fn png_capture() -> Vec<u8> {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 12, Rgb([90, 90, 90])));
        let mut buf = std::io::Cursor::new(Vec::new());
        frame
            .write_to(&mut buf, ImageOutputFormat::Png)
            .expect("encode test frame");
        buf.into_inner()
    }

    #[test]
    fn test_empty_capture_is_not_inferred() -> Result<()> {
        let model = FixedModel::new(vec![]);

        let report = run_cycle(&model, &[], Thresholds::default())?;

        assert!(report.is_none());
        assert_eq!(model.runs.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn test_cycle_reports_detections() -> Result<()> {
        let model = FixedModel::new(vec![
            Detection::new([1.0, 1.0, 5.0, 5.0], 0.9, 0.0),
            Detection::new([6.0, 1.0, 9.0, 5.0], 0.8, 0.0),
            Detection::new([1.0, 6.0, 5.0, 10.0], 0.7, 2.0),
        ]);

        let report = run_cycle(&model, &png_capture(), Thresholds::new(0.3, 0.5))?
            .expect("report for a valid capture");

        assert_eq!(model.runs.load(Ordering::SeqCst), 1);
        assert_eq!((report.width, report.height), (16, 12));
        assert_eq!(report.thresholds, Thresholds::new(0.3, 0.5));
        assert_eq!(report.counts.len(), 2);
        assert!(report.annotated_jpeg.is_some());
        Ok(())
    }

    #[test]
    fn test_cycle_without_detections() -> Result<()> {
        let model = FixedModel::new(vec![]);

        let report = run_cycle(&model, &png_capture(), Thresholds::default())?
            .expect("report for a valid capture");

        assert!(report.objects.is_empty());
        assert!(report.counts.is_empty());
        assert!(report.annotated_jpeg.is_some());
        Ok(())
    }
}
