//! # Malaria Detect
//!
//! Binary classification of thin blood-smear cell images (parasitized vs.
//! uninfected) using the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: image-folder indexing, stratified splits, augmentation and Burn batching
//! - `model`: convolutional classifier with a separable backbone and head
//! - `training`: trainer, early stopping, k-fold cross-validation and the full pipeline
//! - `evaluation`: binary metrics suite, curves and CSV reports
//! - `visualization`: SVG charts, PCA / t-SNE embeddings and Grad-CAM overlays
//! - `export`: self-contained model bundle and JSON weight export
//! - `inference`: single-image prediction used by the CLI and the HTTP server
//! - `utils`: error types, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use malaria_detect::backend::TrainingBackend;
//! use malaria_detect::config::PipelineConfig;
//! use malaria_detect::training::pipeline::run_pipeline;
//!
//! let config = PipelineConfig::default();
//! let summary = run_pipeline::<TrainingBackend>(&config)?;
//! println!("test accuracy: {:.3}", summary.test_metrics.accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod export;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;
pub mod visualization;

pub use config::PipelineConfig;
pub use dataset::loader::MalariaDataset;
pub use dataset::{MalariaBatch, MalariaBatcher, MalariaBurnDataset, MalariaItem};
pub use evaluation::metrics::BinaryMetrics;
pub use inference::predictor::{Prediction, Predictor};
pub use model::cnn::{MalariaClassifier, MalariaClassifierConfig};
pub use training::early_stopping::{EarlyStopping, StopDecision};
pub use training::trainer::{Trainer, TrainingHistory};
pub use utils::error::{MalariaError, Result};

/// Number of output classes (parasitized, uninfected)
pub const NUM_CLASSES: usize = 2;

/// Default square input size fed to the network
pub const IMAGE_SIZE: usize = 224;

/// Default seed shared by splits, shuffling and t-SNE
pub const DEFAULT_SEED: u64 = 42;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
