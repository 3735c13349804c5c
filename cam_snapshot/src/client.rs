//! HTTP client for the detect server.
//!
use std::fmt::Write;

use base64::prelude::*;
use common::protocol::{DetectionReport, ModelStatus, Thresholds};
use reqwest::StatusCode;
use simple_error::simple_error;

use crate::Error;

pub struct DetectClient {
    client: reqwest::Client,
    base_url: String,
}

impl DetectClient {
    /// Client for a server listening on `address`, e.g. `127.0.0.1:3000`.
    pub fn new(address: &str) -> Self {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_owned()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query whether the server has its detector loaded.
    pub async fn status(&self) -> Result<ModelStatus, Error> {
        let response = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await?;

        Ok(response.error_for_status()?.json().await?)
    }

    /// Send one encoded still for analysis.
    ///
    /// Returns `None` when the server could not decode the still.
    pub async fn detect(
        &self,
        still: Vec<u8>,
        thresholds: Thresholds,
    ) -> Result<Option<DetectionReport>, Error> {
        let response = self
            .client
            .post(format!("{}/api/detect", self.base_url))
            .query(&[
                ("confidence", thresholds.confidence()),
                ("iou", thresholds.iou()),
            ])
            .body(still)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(simple_error!("Server answered {}: {}", status, body).into())
            }
        }
    }
}

/// Decode the annotated JPEG carried by a report.
pub fn annotated_jpeg(report: &DetectionReport) -> Result<Option<Vec<u8>>, Error> {
    match &report.annotated_jpeg {
        Some(encoded) => Ok(Some(BASE64_STANDARD.decode(encoded)?)),
        None => Ok(None),
    }
}

/// Human readable summary of a report.
pub fn format_report(report: &DetectionReport) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Frame {}x{}, confidence {:.2}, IoU {:.2}",
        report.width,
        report.height,
        report.thresholds.confidence(),
        report.thresholds.iou()
    );

    if report.objects.is_empty() {
        out.push_str("No objects detected\n");
        return out;
    }

    out.push_str("\nDetected objects\n");
    for object in &report.objects {
        let _ = writeln!(out, "  {}: {}", object.title, object.description);
    }

    let width = report
        .counts
        .iter()
        .map(|count| count.label.len())
        .max()
        .unwrap_or(0);
    out.push_str("\nCounts\n");
    for count in &report.counts {
        let _ = writeln!(
            out,
            "  {:<width$} {:>3} {}",
            count.label,
            count.count,
            "#".repeat(count.count)
        );
    }

    if !report.unresolved_class_ids.is_empty() {
        let _ = writeln!(
            out,
            "\nUnknown class ids: {:?}",
            report.unresolved_class_ids
        );
    }

    out
}

#[cfg(test)]
mod test {

    use common::protocol::{DescribedObject, LabelCount};

    use super::*;

    fn report() -> DetectionReport {
        DetectionReport {
            width: 640,
            height: 480,
            thresholds: Thresholds::default(),
            detections: vec![],
            objects: vec![
                DescribedObject {
                    label: "person".into(),
                    title: "Person".into(),
                    description: "A human.".into(),
                },
                DescribedObject {
                    label: "car".into(),
                    title: "Car".into(),
                    description: "A vehicle.".into(),
                },
            ],
            counts: vec![
                LabelCount {
                    label: "person".into(),
                    count: 2,
                },
                LabelCount {
                    label: "car".into(),
                    count: 1,
                },
            ],
            unresolved_class_ids: vec![],
            annotated_jpeg: None,
        }
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            DetectClient::new("127.0.0.1:3000").base_url(),
            "http://127.0.0.1:3000"
        );
        assert_eq!(
            DetectClient::new("http://localhost:3000/").base_url(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_format_report() {
        let text = format_report(&report());

        assert!(text.starts_with("Frame 640x480, confidence 0.25, IoU 0.45"));
        assert!(text.contains("Person: A human."));
        assert!(text.contains("person   2 ##\n"));
        assert!(text.contains("car      1 #\n"));
        assert!(!text.contains("Unknown class ids"));
    }

    #[test]
    fn test_format_empty_report() {
        let mut report = report();
        report.objects.clear();
        report.counts.clear();

        let text = format_report(&report);

        assert!(text.ends_with("No objects detected\n"));
    }

    #[test]
    fn test_annotated_jpeg() -> Result<(), Error> {
        let mut report = report();
        assert_eq!(annotated_jpeg(&report)?, None);

        report.annotated_jpeg = Some(BASE64_STANDARD.encode([0xFF, 0xD8, 0xFF]));
        assert_eq!(annotated_jpeg(&report)?, Some(vec![0xFF, 0xD8, 0xFF]));

        report.annotated_jpeg = Some("not base64!".into());
        assert!(annotated_jpeg(&report).is_err());
        Ok(())
    }
}
