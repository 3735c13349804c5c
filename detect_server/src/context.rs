//! Application context shared by all endpoints.
//!
use std::{path::PathBuf, sync::Arc};

use common::protocol::ModelStatus;

use crate::{
    nn::InferModel,
    registry::{LoadError, ModelRegistry},
};

/// Owns the model registry and knows which weights the page runs with.
///
/// Built once in `main` and handed to the endpoints as an `Extension`.
pub struct AppContext {
    registry: ModelRegistry,
    model_path: PathBuf,
}

impl AppContext {
    pub fn new(registry: ModelRegistry, model_path: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            model_path: model_path.into(),
        }
    }

    /// Detector for the configured weights, loaded on first use.
    pub async fn detector(self: &Arc<Self>) -> Result<Arc<dyn InferModel>, LoadError> {
        let ctx = Arc::clone(self);
        tokio::task::spawn_blocking(move || ctx.registry.get_or_load(&ctx.model_path))
            .await
            .unwrap_or_else(|err| Err(LoadError::new(&self.model_path, err)))
    }

    /// Status of the configured weights without triggering a load.
    pub fn status(&self) -> ModelStatus {
        let outcome = self.registry.cached(&self.model_path);
        ModelStatus {
            model: self.model_path.display().to_string(),
            loaded: matches!(outcome, Some(Ok(_))),
            error: outcome
                .and_then(|outcome| outcome.err())
                .map(|err| err.to_string()),
        }
    }
}
