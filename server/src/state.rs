//! Application state for the inference server
//!
//! Holds the loaded predictor (if any) and what the health endpoints report.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{error, info};

use malaria_detect::backend::{backend_name, default_device, DefaultBackend};
use malaria_detect::Predictor;

/// Model metadata captured at load time, readable without the predictor lock
#[derive(Clone, Debug, Serialize)]
pub struct ModelDetails {
    pub model_name: String,
    pub total_parameters: usize,
    pub input_size: usize,
}

/// Shared application state
pub struct AppState {
    /// `None` when the bundle failed to load at start-up
    predictor: Option<Mutex<Predictor<DefaultBackend>>>,
    pub model: Option<ModelDetails>,
    /// Compute device reported by `/health` and `/model-info`
    pub device: String,
    pub model_dir: PathBuf,
}

impl AppState {
    /// Load the exported bundle in `model_dir`.
    ///
    /// A failed load is logged and leaves the server running without a model.
    pub fn load(model_dir: &Path) -> Self {
        let predictor = match Predictor::<DefaultBackend>::load(model_dir, &default_device()) {
            Ok(predictor) => {
                info!(
                    "Model loaded from {:?} ({} parameters)",
                    model_dir,
                    predictor.parameter_count()
                );
                Some(predictor)
            }
            Err(e) => {
                error!("Error loading model from {:?}: {}", model_dir, e);
                None
            }
        };
        Self::new(predictor, model_dir.to_path_buf())
    }

    pub fn new(predictor: Option<Predictor<DefaultBackend>>, model_dir: PathBuf) -> Self {
        let model = predictor.as_ref().map(|p| ModelDetails {
            model_name: p.model_name().to_string(),
            total_parameters: p.parameter_count(),
            input_size: p.image_size(),
        });
        Self {
            predictor: predictor.map(Mutex::new),
            model,
            device: backend_name().to_string(),
            model_dir,
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Exclusive access to the predictor for one inference.
    ///
    /// Blocks until the current inference finishes, so only call it from a
    /// blocking task. A panic in an earlier inference does not disable the
    /// model: the predictor holds no state that a failed forward pass can
    /// leave half-updated.
    pub fn predictor(&self) -> Option<MutexGuard<'_, Predictor<DefaultBackend>>> {
        self.predictor
            .as_ref()
            .map(|predictor| predictor.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub type SharedState = Arc<AppState>;
