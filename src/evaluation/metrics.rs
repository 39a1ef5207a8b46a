//! Binary classification metrics
//!
//! Class 1 is the positive class and every score-based metric (ROC-AUC,
//! PR-AUC, log-loss, calibration) consumes `P(class 1 | x)`.
//!
//! - Accuracy, balanced accuracy, precision, recall, specificity, F1
//! - ROC-AUC and average precision
//! - Matthews correlation and Cohen's kappa
//! - Log-loss, calibration curve and confusion matrix

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{MalariaError, Result};

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking logs
const LOG_LOSS_EPS: f64 = 1e-15;

/// Labels, predicted classes and softmax rows gathered during evaluation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Predictions {
    pub num_classes: usize,
    pub labels: Vec<usize>,
    pub predicted: Vec<usize>,
    pub probabilities: Vec<Vec<f32>>,
}

impl Predictions {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    /// Append a batch; `probs` is row-major `[labels.len(), num_classes]`
    pub fn extend(&mut self, labels: &[usize], probs: &[f32]) {
        for (label, row) in labels.iter().zip(probs.chunks(self.num_classes.max(1))) {
            let predicted = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.labels.push(*label);
            self.predicted.push(predicted);
            self.probabilities.push(row.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn accuracy(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let correct = self.labels.iter().zip(&self.predicted).filter(|(a, b)| a == b).count();
        correct as f64 / self.len() as f64
    }

    /// `P(class 1)` per sample
    pub fn positive_scores(&self) -> Vec<f64> {
        self.probabilities
            .iter()
            .map(|row| row.get(1).copied().unwrap_or(0.0) as f64)
            .collect()
    }

    pub fn metrics(&self) -> Result<BinaryMetrics> {
        BinaryMetrics::compute(&self.labels, &self.predicted, &self.positive_scores())
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        ConfusionMatrix::from_predictions(&self.predicted, &self.labels, self.num_classes)
    }
}

/// The full binary metrics suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub specificity: f64,
    pub f1: f64,
    /// `None` when only one class is present in `y_true`
    pub roc_auc: Option<f64>,
    pub pr_auc: f64,
    pub mcc: f64,
    pub cohen_kappa: f64,
    pub log_loss: f64,
}

/// Column names of the metrics CSV files
pub const METRIC_NAMES: [&str; 11] = [
    "accuracy",
    "balanced_accuracy",
    "precision",
    "recall",
    "specificity",
    "f1",
    "roc_auc",
    "pr_auc",
    "mcc",
    "cohen_kappa",
    "log_loss",
];

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

impl BinaryMetrics {
    /// Compute every metric from labels, hard predictions and `P(class 1)`
    pub fn compute(y_true: &[usize], y_pred: &[usize], y_score: &[f64]) -> Result<Self> {
        if y_true.is_empty() {
            return Err(MalariaError::InvalidInput("cannot compute metrics on zero samples".to_string()));
        }
        if y_true.len() != y_pred.len() || y_true.len() != y_score.len() {
            return Err(MalariaError::InvalidInput(format!(
                "length mismatch: {} labels, {} predictions, {} scores",
                y_true.len(),
                y_pred.len(),
                y_score.len()
            )));
        }
        if let Some(bad) = y_true.iter().chain(y_pred).find(|&&c| c > 1) {
            return Err(MalariaError::InvalidInput(format!("class {} is not binary", bad)));
        }

        let cm = ConfusionMatrix::from_predictions(y_pred, y_true, 2);
        let tn = cm.get(0, 0) as f64;
        let fp = cm.get(0, 1) as f64;
        let fn_ = cm.get(1, 0) as f64;
        let tp = cm.get(1, 1) as f64;
        let n = tn + fp + fn_ + tp;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let specificity = ratio(tn, tn + fp);
        let f1 = ratio(2.0 * precision * recall, precision + recall);

        // Average of the recalls of the classes that are present
        let present: Vec<f64> = [(tn + fp, specificity), (tp + fn_, recall)]
            .iter()
            .filter(|(support, _)| *support > 0.0)
            .map(|(_, r)| *r)
            .collect();
        let balanced_accuracy = present.iter().sum::<f64>() / present.len() as f64;

        let mcc_den = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        let mcc = ratio(tp * tn - fp * fn_, mcc_den);

        let observed = (tp + tn) / n;
        let expected = ((tp + fp) * (tp + fn_) + (tn + fn_) * (tn + fp)) / (n * n);
        let cohen_kappa = ratio(observed - expected, 1.0 - expected);

        Ok(Self {
            accuracy: (tp + tn) / n,
            balanced_accuracy,
            precision,
            recall,
            specificity,
            f1,
            roc_auc: roc_auc(y_true, y_score),
            pr_auc: average_precision(y_true, y_score),
            mcc,
            cohen_kappa,
            log_loss: log_loss(y_true, y_score),
        })
    }

    /// Values in `METRIC_NAMES` order; a missing ROC-AUC is NaN
    pub fn values(&self) -> [f64; 11] {
        [
            self.accuracy,
            self.balanced_accuracy,
            self.precision,
            self.recall,
            self.specificity,
            self.f1,
            self.roc_auc.unwrap_or(f64::NAN),
            self.pr_auc,
            self.mcc,
            self.cohen_kappa,
            self.log_loss,
        ]
    }

    pub fn csv_row(&self) -> String {
        self.values()
            .iter()
            .map(|v| format!("{}", v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Write a header and one row
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        save_csv_rows(std::slice::from_ref(self), path)
    }

    /// Two-column `name value` table
    pub fn table(&self, title: &str) -> String {
        let mut out = format!("\n{}\n{}\n", title, "-".repeat(title.len()));
        for (name, value) in METRIC_NAMES.iter().zip(self.values()) {
            let _ = writeln!(out, "{:<18} {:.6}", name, value);
        }
        out
    }
}

impl std::fmt::Display for BinaryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc {:.4} | f1 {:.4} | roc_auc {} | mcc {:.4}",
            self.accuracy,
            self.f1,
            self.roc_auc.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "n/a".to_string()),
            self.mcc
        )
    }
}

/// Write several metric rows under one header (cross-validation folds)
pub fn save_csv_rows(rows: &[BinaryMetrics], path: &Path) -> Result<()> {
    let mut content = METRIC_NAMES.join(",");
    content.push('\n');
    for row in rows {
        content.push_str(&row.csv_row());
        content.push('\n');
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Mean and sample standard deviation per metric, skipping NaN entries
pub fn mean_std(rows: &[BinaryMetrics]) -> Vec<(&'static str, f64, f64)> {
    METRIC_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values: Vec<f64> = rows.iter().map(|r| r.values()[i]).filter(|v| !v.is_nan()).collect();
            if values.is_empty() {
                return (*name, f64::NAN, f64::NAN);
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let std = if values.len() > 1 {
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64).sqrt()
            } else {
                0.0
            };
            (*name, mean, std)
        })
        .collect()
}

/// Samples sorted by decreasing score, grouped into runs of equal score
///
/// Returns cumulative `(fps, tps, threshold)` at the end of every run.
fn cumulative_counts(y_true: &[usize], y_score: &[f64]) -> Vec<(f64, f64, f64)> {
    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| y_score[b].total_cmp(&y_score[a]));

    let mut points = Vec::new();
    let (mut tps, mut fps) = (0.0, 0.0);
    for (pos, &i) in order.iter().enumerate() {
        if y_true[i] == 1 {
            tps += 1.0;
        } else {
            fps += 1.0;
        }
        let last_of_run = order.get(pos + 1).map_or(true, |&next| y_score[next] != y_score[i]);
        if last_of_run {
            points.push((fps, tps, y_score[i]));
        }
    }
    points
}

/// ROC curve as `(fpr, tpr, thresholds)`, starting at (0, 0)
///
/// The first threshold is `+inf`. Rates are 0 for an absent class.
pub fn roc_curve(y_true: &[usize], y_score: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let points = cumulative_counts(y_true, y_score);
    let (total_fp, total_tp) = points.last().map(|&(f, t, _)| (f, t)).unwrap_or((0.0, 0.0));

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    for (fps, tps, threshold) in points {
        fpr.push(ratio(fps, total_fp));
        tpr.push(ratio(tps, total_tp));
        thresholds.push(threshold);
    }
    (fpr, tpr, thresholds)
}

/// Trapezoidal area under the ROC curve; `None` unless both classes occur
pub fn roc_auc(y_true: &[usize], y_score: &[f64]) -> Option<f64> {
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    if positives == 0 || positives == y_true.len() {
        return None;
    }

    let (fpr, tpr, _) = roc_curve(y_true, y_score);
    Some(
        fpr.windows(2)
            .zip(tpr.windows(2))
            .map(|(x, y)| (x[1] - x[0]) * (y[1] + y[0]) / 2.0)
            .sum(),
    )
}

/// Precision-recall curve as `(precision, recall, thresholds)`
///
/// Ordered by increasing recall and prefixed with the (recall 0, precision
/// 1) anchor, whose threshold is `+inf`.
pub fn precision_recall_curve(y_true: &[usize], y_score: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let points = cumulative_counts(y_true, y_score);
    let total_tp = points.last().map(|&(_, t, _)| t).unwrap_or(0.0);

    let mut precision = vec![1.0];
    let mut recall = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    for (fps, tps, threshold) in points {
        precision.push(ratio(tps, tps + fps));
        recall.push(ratio(tps, total_tp));
        thresholds.push(threshold);
    }
    (precision, recall, thresholds)
}

/// Average precision: sum over thresholds of `(R_n - R_{n-1}) * P_n`
pub fn average_precision(y_true: &[usize], y_score: &[f64]) -> f64 {
    let (precision, recall, _) = precision_recall_curve(y_true, y_score);
    recall
        .windows(2)
        .zip(precision.iter().skip(1))
        .map(|(r, p)| (r[1] - r[0]) * p)
        .sum()
}

/// Binary cross-entropy of `P(class 1)`
pub fn log_loss(y_true: &[usize], y_score: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let total: f64 = y_true
        .iter()
        .zip(y_score)
        .map(|(&y, &p)| {
            let p = p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
            if y == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y_true.len() as f64
}

/// Reliability diagram data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    /// Mean predicted probability per non-empty bin
    pub mean_predicted: Vec<f64>,
    /// Observed fraction of positives per non-empty bin
    pub fraction_positive: Vec<f64>,
    /// Samples per non-empty bin
    pub counts: Vec<usize>,
}

/// Calibration curve over `n_bins` uniform bins of `[0, 1]`
///
/// A score lying exactly on an inner edge belongs to the lower bin.
pub fn calibration_curve(y_true: &[usize], y_score: &[f64], n_bins: usize) -> CalibrationCurve {
    let n_bins = n_bins.max(1);
    let mut sum_pred = vec![0.0; n_bins];
    let mut sum_true = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];

    for (&y, &p) in y_true.iter().zip(y_score) {
        let bin = ((p * n_bins as f64).ceil() as isize - 1).clamp(0, n_bins as isize - 1) as usize;
        sum_pred[bin] += p;
        sum_true[bin] += y as f64;
        counts[bin] += 1;
    }

    let mut curve = CalibrationCurve {
        mean_predicted: Vec::new(),
        fraction_positive: Vec::new(),
        counts: Vec::new(),
    };
    for bin in 0..n_bins {
        if counts[bin] > 0 {
            let c = counts[bin] as f64;
            curve.mean_predicted.push(sum_pred[bin] / c);
            curve.fraction_positive.push(sum_true[bin] / c);
            curve.counts.push(counts[bin]);
        }
    }
    curve
}

/// Confusion matrix (row = actual, column = predicted), flat row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth) {
            cm.add(actual, pred);
        }
        cm
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Rows scaled to sum to 1 (all-zero rows stay zero)
    pub fn normalize_rows(&self) -> Vec<Vec<f64>> {
        let row_sums = self.row_sums();
        (0..self.num_classes)
            .map(|row| {
                (0..self.num_classes)
                    .map(|col| ratio(self.get(row, col) as f64, row_sums[row] as f64))
                    .collect()
            })
            .collect()
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col) as f64).collect())
            .collect()
    }

    pub fn display(&self, class_names: &[String]) -> String {
        let name = |i: usize| class_names.get(i).cloned().unwrap_or_else(|| i.to_string());
        let mut out = String::from("\nConfusion Matrix (rows=actual, cols=predicted):\n\n");

        let _ = write!(out, "{:>14}", "");
        for col in 0..self.num_classes {
            let _ = write!(out, "{:>14}", name(col));
        }
        out.push('\n');

        for row in 0..self.num_classes {
            let _ = write!(out, "{:>14}", name(row));
            for col in 0..self.num_classes {
                let _ = write!(out, "{:>14}", self.get(row, col));
            }
            out.push('\n');
        }
        out
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            let _ = write!(content, ",{}", col);
        }
        content.push('\n');
        for row in 0..self.num_classes {
            content.push_str(&row.to_string());
            for col in 0..self.num_classes {
                let _ = write!(content, ",{}", self.get(row, col));
            }
            content.push('\n');
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_basic_counts() {
        // tn=2 fp=1 fn=1 tp=2
        let y_true = [0, 0, 0, 1, 1, 1];
        let y_pred = [0, 0, 1, 0, 1, 1];
        let y_score = [0.1, 0.2, 0.7, 0.4, 0.8, 0.9];
        let m = BinaryMetrics::compute(&y_true, &y_pred, &y_score).unwrap();

        assert!(approx(m.accuracy, 4.0 / 6.0));
        assert!(approx(m.precision, 2.0 / 3.0));
        assert!(approx(m.recall, 2.0 / 3.0));
        assert!(approx(m.specificity, 2.0 / 3.0));
        assert!(approx(m.f1, 2.0 / 3.0));
        assert!(approx(m.balanced_accuracy, 2.0 / 3.0));
        // (tp*tn - fp*fn) / sqrt(3*3*3*3) = 3 / 9
        assert!(approx(m.mcc, 1.0 / 3.0));
        // po = 4/6, pe = 0.5
        assert!(approx(m.cohen_kappa, 1.0 / 3.0));
    }

    #[test]
    fn test_roc_auc_perfect_and_ties() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
        // All scores tied: the curve is the diagonal
        assert_eq!(roc_auc(&[0, 1, 0, 1], &[0.5, 0.5, 0.5, 0.5]), Some(0.5));
    }

    #[test]
    fn test_roc_auc_reference_value() {
        // Ranking statistic: 3 of 4 positive/negative pairs ordered correctly
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!(approx(auc, 0.75));
    }

    #[test]
    fn test_roc_auc_single_class_is_none() {
        assert_eq!(roc_auc(&[1, 1, 1], &[0.2, 0.5, 0.9]), None);
        let m = BinaryMetrics::compute(&[0, 0], &[0, 0], &[0.1, 0.2]).unwrap();
        assert!(m.roc_auc.is_none());
        assert!(m.csv_row().contains("NaN"));
    }

    #[test]
    fn test_roc_curve_starts_at_origin() {
        let (fpr, tpr, thresholds) = roc_curve(&[0, 1, 1], &[0.3, 0.6, 0.6]);
        assert_eq!((fpr[0], tpr[0]), (0.0, 0.0));
        assert!(thresholds[0].is_infinite());
        assert_eq!(fpr.last(), Some(&1.0));
        assert_eq!(tpr.last(), Some(&1.0));
        // Two distinct scores give two points after the origin
        assert_eq!(fpr.len(), 3);
    }

    #[test]
    fn test_average_precision_reference_value() {
        // sklearn: average_precision_score([0, 0, 1, 1], [0.1, 0.4, 0.35, 0.8]) = 0.8333...
        let ap = average_precision(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]);
        assert!((ap - 0.833_333_333).abs() < 1e-6);
    }

    #[test]
    fn test_log_loss_clips() {
        let loss = log_loss(&[1, 0], &[1.0, 0.0]);
        assert!(loss >= 0.0 && loss < 1e-10);

        let loss = log_loss(&[1], &[0.0]);
        assert!((loss - (-(1e-15f64).ln())).abs() < 1e-6);
    }

    #[test]
    fn test_mcc_zero_denominator() {
        let m = BinaryMetrics::compute(&[0, 1, 0, 1], &[1, 1, 1, 1], &[0.6; 4]).unwrap();
        assert_eq!(m.mcc, 0.0);
        assert_eq!(m.specificity, 0.0);
        assert_eq!(m.recall, 1.0);
    }

    #[test]
    fn test_calibration_bins() {
        let y_true = [0, 0, 1, 1, 1];
        let y_score = [0.05, 0.1, 0.15, 0.95, 1.0];
        let curve = calibration_curve(&y_true, &y_score, 10);

        // 0.05 and 0.1 share the first bin; 0.15 alone; 0.95 and 1.0 in the last
        assert_eq!(curve.counts, vec![2, 1, 2]);
        assert!(approx(curve.fraction_positive[0], 0.0));
        assert!(approx(curve.fraction_positive[2], 1.0));
        assert!(approx(curve.mean_predicted[0], 0.075));
    }

    #[test]
    fn test_predictions_collect() {
        let mut preds = Predictions::new(2);
        preds.extend(&[0, 1, 1], &[0.9, 0.1, 0.3, 0.7, 0.6, 0.4]);

        assert_eq!(preds.predicted, vec![0, 1, 0]);
        assert!(approx(preds.accuracy(), 2.0 / 3.0));
        let scores = preds.positive_scores();
        assert!((scores[1] - 0.7).abs() < 1e-6);
        assert_eq!(preds.confusion_matrix().get(1, 0), 1);
    }

    #[test]
    fn test_input_validation() {
        assert!(BinaryMetrics::compute(&[], &[], &[]).is_err());
        assert!(BinaryMetrics::compute(&[0, 1], &[0], &[0.1, 0.2]).is_err());
        assert!(BinaryMetrics::compute(&[0, 2], &[0, 1], &[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_confusion_matrix_normalize() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1, 1], &[0, 0, 1, 1], 2);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.total(), 4);
        let norm = cm.normalize_rows();
        assert!(approx(norm[0][0], 0.5));
        assert!(approx(norm[1][1], 1.0));
    }

    #[test]
    fn test_csv_writers() {
        let dir = tempfile::TempDir::new().unwrap();
        let m = BinaryMetrics::compute(&[0, 1], &[0, 1], &[0.2, 0.8]).unwrap();

        let path = dir.path().join("test_metrics.csv");
        m.save_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("accuracy,balanced_accuracy"));
        assert_eq!(lines[1].split(',').count(), 11);

        let path = dir.path().join("cv_metrics.csv");
        save_csv_rows(&[m.clone(), m], &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_mean_std() {
        let a = BinaryMetrics::compute(&[0, 1], &[0, 1], &[0.2, 0.8]).unwrap();
        let b = BinaryMetrics::compute(&[0, 1], &[1, 1], &[0.6, 0.8]).unwrap();
        let summary = mean_std(&[a, b]);

        let (name, mean, std) = summary[0];
        assert_eq!(name, "accuracy");
        assert!(approx(mean, 0.75));
        assert!((std - (0.125f64).sqrt()).abs() < 1e-9);
    }
}
