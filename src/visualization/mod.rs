//! Visualization: SVG charts, feature embeddings and Grad-CAM overlays

pub mod charts;
pub mod embedding;
pub mod gradcam;

use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use crate::evaluation::metrics::{
    average_precision, calibration_curve, precision_recall_curve, roc_auc, roc_curve, Predictions,
};
use crate::utils::error::Result;

pub use embedding::{pca, tsne, TsneConfig};
pub use gradcam::{save_overlays, GradCam};

/// Write ROC, PR, calibration and both confusion charts for `predictions`
pub fn save_evaluation_plots(
    predictions: &Predictions,
    class_names: &[String],
    calibration_bins: usize,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let y_true = &predictions.labels;
    let scores = predictions.positive_scores();
    let path = |name: &str| output_dir.join(name);

    let (fpr, tpr, _) = roc_curve(y_true, &scores);
    charts::roc_chart(&fpr, &tpr, roc_auc(y_true, &scores), &path("roc.svg"))?;

    let (precision, recall, _) = precision_recall_curve(y_true, &scores);
    charts::pr_chart(&precision, &recall, average_precision(y_true, &scores), &path("pr.svg"))?;

    let curve = calibration_curve(y_true, &scores, calibration_bins);
    charts::calibration_chart(&curve, &path("calibration.svg"))?;

    let cm = predictions.confusion_matrix();
    charts::confusion_heatmap("Confusion Matrix", &cm.rows(), class_names, false, &path("confusion.svg"))?;
    charts::confusion_heatmap(
        "Normalized Confusion Matrix",
        &cm.normalize_rows(),
        class_names,
        true,
        &path("confusion_norm.svg"),
    )?;

    let written: Vec<PathBuf> = ["roc.svg", "pr.svg", "calibration.svg", "confusion.svg", "confusion_norm.svg"]
        .iter()
        .map(|name| path(name))
        .collect();
    info!("Saved evaluation plots to {:?}", output_dir);
    Ok(written)
}

/// PCA and t-SNE scatter plots of embedded features
///
/// PCA needs 2 samples (one component when there are exactly 2) and t-SNE
/// needs 5, with perplexity `min(5, n - 1)`. Skipped plots are logged.
pub fn save_embedding_plots(
    features: &Array2<f64>,
    labels: &[usize],
    class_names: &[String],
    seed: u64,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let n = features.nrows();
    let mut written = Vec::new();

    if n >= 2 {
        let components = if n > 2 { 2 } else { 1 };
        let projected = pca(features, components)?;
        let path = output_dir.join("pca.svg");
        charts::scatter_chart("PCA Visualization", &rows(&projected), labels, class_names, &path)?;
        written.push(path);
    } else {
        info!("PCA plot skipped: need at least 2 samples, have {}", n);
    }

    if n >= 5 {
        let config = TsneConfig {
            seed,
            ..Default::default()
        }
        .with_perplexity(5.0f64.min(n as f64 - 1.0));
        let embedded = tsne(features, &config)?;
        let path = output_dir.join("tsne.svg");
        charts::scatter_chart("t-SNE Visualization", &rows(&embedded), labels, class_names, &path)?;
        written.push(path);
    } else {
        info!("t-SNE plot skipped: need at least 5 samples, have {}", n);
    }

    Ok(written)
}

fn rows(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names() -> Vec<String> {
        vec!["Parasitized".to_string(), "Uninfected".to_string()]
    }

    #[test]
    fn test_evaluation_plots_written() {
        let dir = TempDir::new().unwrap();
        let mut predictions = Predictions::new(2);
        predictions.extend(&[0, 1, 0, 1], &[0.9, 0.1, 0.3, 0.7, 0.6, 0.4, 0.2, 0.8]);

        let written = save_evaluation_plots(&predictions, &names(), 10, dir.path()).unwrap();
        assert_eq!(written.len(), 5);
        assert!(written.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_embedding_plots_respect_sample_counts() {
        let dir = TempDir::new().unwrap();

        let two = embedding::to_matrix(vec![0.0, 1.0, 1.0, 0.0], 2, 2).unwrap();
        let written = save_embedding_plots(&two, &[0, 1], &names(), 42, dir.path()).unwrap();
        assert_eq!(written, vec![dir.path().join("pca.svg")]);

        let data: Vec<f64> = (0..18).map(|i| (i % 7) as f64 + (i / 3) as f64 * 0.1).collect();
        let six = embedding::to_matrix(data, 6, 3).unwrap();
        let written = save_embedding_plots(&six, &[0, 1, 0, 1, 0, 1], &names(), 42, dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join("tsne.svg").exists());
    }

    #[test]
    fn test_single_sample_skips_everything() {
        let dir = TempDir::new().unwrap();
        let one = embedding::to_matrix(vec![1.0, 2.0], 1, 2).unwrap();
        assert!(save_embedding_plots(&one, &[0], &names(), 42, dir.path()).unwrap().is_empty());
    }
}
