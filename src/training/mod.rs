//! Training module
//!
//! This module provides:
//! - The training loop with AdamW, cross-entropy loss and checkpointing
//! - Early stopping on validation accuracy
//! - Stratified k-fold cross-validation
//! - The end-to-end experiment pipeline
//!
//! ## Pipeline
//!
//! 1. Index the dataset and print diagnostics
//! 2. Optionally cross-validate
//! 3. Stratified train/test split
//! 4. Train with early stopping, keeping the best checkpoint
//! 5. Metrics, plots, embeddings and Grad-CAM on the test split
//! 6. Model summary and export

pub mod cross_validation;
pub mod early_stopping;
pub mod pipeline;
pub mod trainer;

pub use cross_validation::{run_cross_validation, CrossValidationReport, FoldResult};
pub use early_stopping::{EarlyStopping, StopDecision};
pub use pipeline::{run_pipeline, ModelSummary, PipelineSummary};
pub use trainer::{build_model, evaluate_model, load_classifier, Evaluation, Trainer, TrainingHistory};
