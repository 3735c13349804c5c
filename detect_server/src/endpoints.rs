//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    extract::Query,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use common::protocol::{ModelStatus, Thresholds};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;

use crate::{context::AppContext, inferer::run_cycle, meter::METER, page, registry::LoadError};

/// Search parameters of a detect request.
#[derive(Debug, Default, Deserialize)]
pub struct DetectParams {
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    iou: Option<f32>,
}

impl DetectParams {
    /// Thresholds for this request, defaults filled in and values clamped.
    pub fn thresholds(&self) -> Thresholds {
        let defaults = Thresholds::default();
        Thresholds::new(
            self.confidence.unwrap_or(defaults.confidence()),
            self.iou.unwrap_or(defaults.iou()),
        )
    }
}

/// Body of error responses.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failures of a detect request, each scoped to that request.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error(transparent)]
    ModelUnavailable(#[from] LoadError),
    #[error("inference failed: {0:#}")]
    Inference(#[from] anyhow::Error),
    #[error("inference task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = match &self {
            DetectError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DetectError::Inference(_) | DetectError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log::error!("Detect request failed: {self}");

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Page with controls, or an error banner if the model is unavailable.
pub async fn index(Extension(ctx): Extension<Arc<AppContext>>) -> Response {
    match ctx.detector().await {
        Ok(_) => Html(page::INDEX.clone()).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Html(page::error_page(&err.to_string())),
        )
            .into_response(),
    }
}

/// State of the configured model.
pub async fn status(Extension(ctx): Extension<Arc<AppContext>>) -> Json<ModelStatus> {
    Json(ctx.status())
}

/// Run detection on one captured still.
///
/// Answers `204 No Content` if the capture is empty or does not decode.
pub async fn detect(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(params): Query<DetectParams>,
    capture: Bytes,
) -> Result<Response, DetectError> {
    METER.tick_capture();
    log::debug!("Capture of {} bytes received", capture.len());

    let detector = ctx.detector().await?;
    let thresholds = params.thresholds();

    let report =
        tokio::task::spawn_blocking(move || run_cycle(detector.as_ref(), &capture, thresholds))
            .await??;

    Ok(match report {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_params_default_to_slider_defaults() {
        assert_eq!(DetectParams::default().thresholds(), Thresholds::default());
    }

    #[test]
    fn test_params_are_clamped() {
        let params = DetectParams {
            confidence: Some(1.5),
            iou: Some(0.3),
        };

        assert_eq!(params.thresholds(), Thresholds::new(1.0, 0.3));
    }
}
