//! Stratified k-fold cross-validation
//!
//! Every fold trains a fresh model with early stopping, restores its best
//! checkpoint and scores the held-out fold with the full metrics suite.

use std::path::PathBuf;

use burn::{data::dataset::Dataset, module::AutodiffModule, tensor::backend::AutodiffBackend};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::{stratified_k_fold, MalariaBurnDataset};
use crate::evaluation::metrics::{mean_std, save_csv_rows, BinaryMetrics};
use crate::training::trainer::{build_model, evaluate_model, Trainer, TrainingHistory};
use crate::utils::error::Result;

/// Outcome of one fold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    /// 1-based fold number
    pub fold: usize,
    pub train_size: usize,
    pub val_size: usize,
    pub history: TrainingHistory,
    pub metrics: BinaryMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationReport {
    pub folds: Vec<FoldResult>,
    /// Where the per-fold metric rows were written
    pub csv_path: PathBuf,
}

impl CrossValidationReport {
    pub fn metrics(&self) -> Vec<BinaryMetrics> {
        self.folds.iter().map(|f| f.metrics.clone()).collect()
    }

    /// `(metric, mean, std)` across folds
    pub fn summary(&self) -> Vec<(&'static str, f64, f64)> {
        mean_std(&self.metrics())
    }
}

/// Run `config.folds`-fold cross-validation over `dataset`
///
/// Checkpoints go to `cv_fold{k}` and the metric rows to `cv_metrics.csv`
/// inside `config.output_dir`.
pub fn run_cross_validation<B: AutodiffBackend>(
    dataset: &MalariaBurnDataset,
    num_classes: usize,
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<CrossValidationReport> {
    let k = config.folds;
    let splits = stratified_k_fold(&dataset.labels(), k, config.seed)?;
    std::fs::create_dir_all(&config.output_dir)?;

    let mut folds = Vec::with_capacity(k);
    for (i, (train_idx, val_idx)) in splits.into_iter().enumerate() {
        let fold = i + 1;
        println!();
        println!("{}", format!("CV Fold {}/{}", fold, k).cyan().bold());

        let train = dataset.subset(&train_idx);
        let val = dataset.subset(&val_idx);
        let checkpoint = config.output_dir.join(format!("cv_fold{}", fold));

        let model = build_model::<B>(config, num_classes, device)?;
        let mut trainer = Trainer::new(model, config, device.clone(), &format!("fold {}", fold));
        let history = trainer.fit(&train, &val, &checkpoint)?;

        let eval = evaluate_model(
            &trainer.model.valid(),
            &val,
            config.batch_size,
            config.image_size,
            device,
        )?;
        let metrics = eval.predictions.metrics()?;
        info!("Fold {}: {}", fold, metrics);

        folds.push(FoldResult {
            fold,
            train_size: train.len(),
            val_size: val.len(),
            history,
            metrics,
        });
    }

    let csv_path = config.output_dir.join("cv_metrics.csv");
    let report = CrossValidationReport { folds, csv_path };
    save_csv_rows(&report.metrics(), &report.csv_path)?;

    println!();
    println!("{}", "Cross-validation (mean ± std)".green().bold());
    for (name, mean, std) in report.summary() {
        println!("  {:<18} {:.4} ± {:.4}", name, mean, std);
    }
    info!("CV metrics saved to {:?}", report.csv_path);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::trainer::tests::{toy_config, toy_dataset};
    use crate::training::trainer::checkpoint_file;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_three_folds_write_rows_and_checkpoints() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            folds: 3,
            output_dir: dir.path().to_path_buf(),
            ..toy_config(2)
        };
        let data = toy_dataset(6);

        let report = run_cross_validation::<TestBackend>(&data, 2, &config, &Default::default()).unwrap();

        assert_eq!(report.folds.len(), 3);
        let val_total: usize = report.folds.iter().map(|f| f.val_size).sum();
        assert_eq!(val_total, data.len());
        for fold in 1..=3 {
            assert!(checkpoint_file(&dir.path().join(format!("cv_fold{}", fold))).exists());
        }

        let csv = std::fs::read_to_string(&report.csv_path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("accuracy,balanced_accuracy"));
        assert_eq!(report.summary().len(), 11);
    }

    #[test]
    fn test_too_many_folds_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            folds: 5,
            output_dir: dir.path().to_path_buf(),
            ..toy_config(1)
        };
        let result = run_cross_validation::<TestBackend>(&toy_dataset(2), 2, &config, &Default::default());
        assert!(result.is_err());
    }
}
