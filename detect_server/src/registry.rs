//! Loading detectors once per weights path.
//!
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Instant,
};

use thiserror::Error;

use crate::nn::{InferModel, ModelOptions, YoloV5Model};

/// Function building a detector from a weights path.
pub type LoadFn = Box<dyn Fn(&Path) -> anyhow::Result<Arc<dyn InferModel>> + Send + Sync>;

/// A detector could not be loaded.
#[derive(Debug, Clone, Error)]
#[error("failed to load model {}: {reason}", .path.display())]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl LoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

type LoadOutcome = Result<Arc<dyn InferModel>, LoadError>;

/// Memoizes detectors by weights path.
///
/// The load function runs at most once per path. Failures are remembered as well, so a broken
/// path keeps reporting the same error without touching the file system again. The map lock is
/// only held to look up the per-path cell, never while a model loads.
pub struct ModelRegistry {
    loader: LoadFn,
    loaded: Mutex<HashMap<PathBuf, Arc<OnceLock<LoadOutcome>>>>,
}

impl ModelRegistry {
    pub fn new(loader: LoadFn) -> Self {
        Self {
            loader,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Registry loading YOLOv5 ONNX models.
    pub fn yolov5(options: ModelOptions) -> Self {
        Self::new(Box::new(
            move |path: &Path| -> anyhow::Result<Arc<dyn InferModel>> {
                let model = YoloV5Model::load(path, &options)?;
                Ok(Arc::new(model))
            },
        ))
    }

    /// Get the detector for `path`, loading it on first use.
    ///
    /// Blocks while the load function runs. Concurrent callers for the same path wait for the
    /// first load, callers for other paths are not held up.
    pub fn get_or_load(&self, path: &Path) -> LoadOutcome {
        let cell = {
            let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(loaded.entry(path.to_path_buf()).or_default())
        };

        cell.get_or_init(|| self.load(path)).clone()
    }

    /// Outcome of an earlier load, if any. Never waits for a load in progress.
    pub fn cached(&self, path: &Path) -> Option<LoadOutcome> {
        let loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        loaded.get(path).and_then(|cell| cell.get().cloned())
    }

    fn load(&self, path: &Path) -> LoadOutcome {
        log::info!("Loading model {}", path.display());
        let start = Instant::now();

        match (self.loader)(path) {
            Ok(model) => {
                log::info!(
                    "Loaded model {} with {} classes in {:.2}s",
                    path.display(),
                    model.names().len(),
                    start.elapsed().as_secs_f32()
                );
                Ok(model)
            }
            Err(err) => {
                log::error!("Failed to load model {}: {err:#}", path.display());
                Err(LoadError::new(path, format!("{err:#}")))
            }
        }
    }
}
