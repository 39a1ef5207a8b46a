//! Evaluation: the binary metrics suite, curves and CSV reports

pub mod metrics;

pub use metrics::{
    average_precision, calibration_curve, log_loss, mean_std, precision_recall_curve, roc_auc, roc_curve,
    save_csv_rows, BinaryMetrics, CalibrationCurve, ConfusionMatrix, Predictions, METRIC_NAMES,
};
