//! Object detection with explanations, served as a single web page.
//!
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};

pub mod annotate;
pub mod capture;
pub mod context;
pub mod endpoints;
pub mod inferer;
pub mod meter;
pub mod nn;
pub mod page;
pub mod present;
pub mod registry;

use context::AppContext;
use endpoints::{detect, healthcheck, index, status};

/// Largest accepted capture in bytes.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// Build the HTTP routes of the page and its API.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/api/status", get(status))
        .route("/api/detect", post(detect))
        .layer(DefaultBodyLimit::max(MAX_CAPTURE_BYTES))
        .layer(Extension(ctx))
}
