//! Pipeline configuration
//!
//! Every hyperparameter of a training run lives in [`PipelineConfig`]. The
//! CLI starts from `Default` (or a JSON file) and overrides individual
//! fields from flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::cnn::MalariaClassifierConfig;
use crate::utils::error::{MalariaError, Result};

/// Configuration of a full train / evaluate / export run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Image-folder dataset root (one subdirectory per class)
    pub data_dir: PathBuf,
    /// Directory receiving checkpoints, CSVs, plots and exports
    pub output_dir: PathBuf,
    pub seed: u64,
    pub image_size: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    /// Epochs without improvement before stopping
    pub patience: usize,
    /// Minimum validation accuracy gain that counts as an improvement
    pub min_delta: f64,
    /// Number of cross-validation folds; 0 disables cross-validation
    pub folds: usize,
    /// Test fraction for datasets with at least 20 images
    pub test_fraction: f64,
    pub dropout: f64,
    /// Filters of the first conv block
    pub base_filters: usize,
    /// Optional record with pretrained backbone weights
    pub pretrained_backbone: Option<PathBuf>,
    pub freeze_backbone: bool,
    pub calibration_bins: usize,
    pub gradcam_samples: usize,
    /// Worker threads for image decoding; 0 uses rayon's default
    pub num_workers: usize,
    pub augmentation: AugmentationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/train"),
            output_dir: PathBuf::from("reports"),
            seed: crate::DEFAULT_SEED,
            image_size: crate::IMAGE_SIZE,
            batch_size: 8,
            learning_rate: 3e-4,
            weight_decay: 1e-2,
            epochs: 7,
            patience: 2,
            min_delta: 1e-4,
            folds: 0,
            test_fraction: 0.15,
            dropout: 0.3,
            base_filters: 32,
            pretrained_backbone: None,
            freeze_backbone: false,
            calibration_bins: 10,
            gradcam_samples: 4,
            num_workers: 0,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(MalariaError::Config(msg.to_string()));

        if self.image_size < 32 {
            return fail("image_size must be at least 32 (five 2x poolings)");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0");
        }
        if self.epochs == 0 {
            return fail("epochs must be greater than 0");
        }
        if !(self.learning_rate > 0.0) {
            return fail("learning_rate must be positive");
        }
        if self.weight_decay < 0.0 {
            return fail("weight_decay must be non-negative");
        }
        if self.min_delta < 0.0 {
            return fail("min_delta must be non-negative");
        }
        if self.folds == 1 {
            return fail("folds must be 0 (disabled) or at least 2");
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return fail("test_fraction must be in (0, 1)");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return fail("dropout must be in [0, 1)");
        }
        if self.base_filters == 0 {
            return fail("base_filters must be greater than 0");
        }
        if self.calibration_bins == 0 {
            return fail("calibration_bins must be greater than 0");
        }
        self.augmentation.validate().map_err(MalariaError::Config)
    }

    /// Network configuration for `num_classes` outputs
    pub fn classifier_config(&self, num_classes: usize) -> MalariaClassifierConfig {
        MalariaClassifierConfig::new()
            .with_num_classes(num_classes)
            .with_input_size(self.image_size)
            .with_dropout(self.dropout)
            .with_base_filters(self.base_filters)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load from JSON; missing fields take their default
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MalariaError::PathNotFound(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Test-set size rule: a third (at least 2) for tiny datasets
    pub fn test_size_for(&self, n: usize) -> crate::dataset::split::TestSize {
        use crate::dataset::split::TestSize;
        if n < 20 {
            TestSize::Count((n / 3).max(2))
        } else {
            TestSize::Fraction(self.test_fraction)
        }
    }
}
