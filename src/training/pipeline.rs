//! End-to-end experiment pipeline
//!
//! Dataset diagnostics, optional cross-validation, train/test split,
//! training with early stopping, the metrics suite, every report plot,
//! model summary and both export formats, all written to
//! `config.output_dir`.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    tensor::backend::{AutodiffBackend, Backend},
};
use colored::Colorize;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dataset::split::SplitStats;
use crate::dataset::{
    is_canonical_layout, stratified_train_test_split, MalariaBatcher, MalariaBurnDataset, MalariaDataset, CLASS_NAMES,
};
use crate::evaluation::metrics::BinaryMetrics;
use crate::export::{export_bundle, export_weights_json};
use crate::inference::{Predictor, BENCHMARK_ITERATIONS};
use crate::model::cnn::MalariaClassifier;
use crate::training::cross_validation::{run_cross_validation, CrossValidationReport};
use crate::training::trainer::{build_model, checkpoint_file, evaluate_model, Trainer, TrainingHistory};
use crate::utils::error::{MalariaError, Result};
use crate::utils::{file_size_mb, format_number};
use crate::visualization::{charts, gradcam, save_embedding_plots, save_evaluation_plots};

/// Size and speed of the trained model (`model_summary.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub parameters: usize,
    pub parameters_millions: f64,
    pub checkpoint_size_mb: f64,
    /// Mean single-image latency including preprocessing
    pub inference_latency_ms: f64,
    pub backend: String,
    pub image_size: usize,
}

/// Everything a pipeline run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub class_names: Vec<String>,
    pub dataset_size: usize,
    pub split: SplitStats,
    pub cross_validation: Option<CrossValidationReport>,
    pub history: TrainingHistory,
    pub train_metrics: BinaryMetrics,
    pub test_metrics: BinaryMetrics,
    pub model: ModelSummary,
    pub artifacts: Vec<PathBuf>,
}

fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<PathBuf> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(path.to_path_buf())
}

/// Pooled backbone features of every sample, `[n, C]`
pub fn embed_features<B: Backend>(
    model: &MalariaClassifier<B>,
    dataset: &MalariaBurnDataset,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Result<Array2<f64>> {
    let batcher = MalariaBatcher::<B>::eval(image_size);
    let indices: Vec<usize> = (0..dataset.len()).collect();

    let mut data = Vec::new();
    let mut rows = 0;
    let mut dim = 0;
    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        let batch = batcher.batch(items, device);
        let embedded = model.embed(batch.images);
        let [n, d] = embedded.dims();

        let values: Vec<f32> = embedded
            .into_data()
            .to_vec()
            .map_err(|e| MalariaError::Inference(format!("{:?}", e)))?;
        data.extend(values.into_iter().map(f64::from));
        rows += n;
        dim = d;
    }

    crate::visualization::embedding::to_matrix(data, rows, dim)
}

/// Run the full experiment described by `config`
pub fn run_pipeline<B: AutodiffBackend>(config: &PipelineConfig) -> Result<PipelineSummary> {
    config.validate()?;
    let device = B::Device::default();
    let out = config.output_dir.clone();
    fs::create_dir_all(&out)?;
    config.save(&out.join("config.json"))?;

    if config.num_workers > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .build_global()
        {
            warn!("Could not configure {} worker threads: {}", config.num_workers, e);
        }
    }

    let mut artifacts = vec![out.join("config.json")];

    // 1. Dataset and diagnostics
    section("Loading Dataset...");
    let index = MalariaDataset::new(&config.data_dir)?;
    let stats = index.get_stats();
    stats.print();
    for diag in index.diagnostics(5) {
        match diag.dimensions {
            Some((w, h)) => info!("  sample {} [{}]: {}x{}", diag.index, diag.class_name, w, h),
            None => warn!("  sample {} [{}]: unreadable", diag.index, diag.class_name),
        }
    }
    if index.num_classes() != crate::NUM_CLASSES {
        return Err(MalariaError::Dataset(format!(
            "expected {} class directories, found {}: {:?}",
            crate::NUM_CLASSES,
            index.num_classes(),
            index.class_names
        )));
    }
    let class_names = index.class_names.clone();
    let num_classes = class_names.len();
    if !is_canonical_layout(&class_names) {
        warn!(
            "Classes {:?} are not {:?}; reported diagnoses treat class 0 as parasitized",
            class_names, CLASS_NAMES
        );
    }

    let dataset = MalariaBurnDataset::new_cached(index.path_labels())?;
    let labels = dataset.labels();

    // 2. Cross-validation
    let cross_validation = if config.folds > 0 {
        section(&format!("Cross-Validation ({} folds)...", config.folds));
        let report = run_cross_validation::<B>(&dataset, num_classes, config, &device)?;
        artifacts.push(report.csv_path.clone());
        Some(report)
    } else {
        None
    };

    // 3. Train/test split
    section("Creating Stratified Split...");
    let split = stratified_train_test_split(&labels, config.test_size_for(labels.len()), config.seed)?;
    split.save(&out.join("split.json"))?;
    artifacts.push(out.join("split.json"));
    let split_stats = split.stats(&labels);
    println!("{}", split_stats);

    let train = dataset.subset(&split.train);
    let test = dataset.subset(&split.test);

    // 4. Training; the test split doubles as validation set
    section("Training...");
    let model = build_model::<B>(config, num_classes, &device)?;
    let mut trainer = Trainer::new(model, config, device.clone(), "train");
    let checkpoint = out.join("best");
    let history = trainer.fit(&train, &test, &checkpoint)?;
    artifacts.push(checkpoint_file(&checkpoint));

    // 5. Train metrics from the last-epoch model
    let final_model = trainer
        .final_epoch_model()
        .cloned()
        .unwrap_or_else(|| trainer.model.clone());
    let train_eval = evaluate_model(&final_model.valid(), &train, config.batch_size, config.image_size, &device)?;
    let train_metrics = train_eval.predictions.metrics()?;
    train_metrics.save_csv(&out.join("train_metrics.csv"))?;
    artifacts.push(out.join("train_metrics.csv"));

    // 6. Test metrics from the best checkpoint
    let best = trainer.model.valid();
    let test_eval = evaluate_model(&best, &test, config.batch_size, config.image_size, &device)?;
    let test_metrics = test_eval.predictions.metrics()?;
    test_metrics.save_csv(&out.join("test_metrics.csv"))?;
    artifacts.push(out.join("test_metrics.csv"));
    artifacts.push(write_json(&test_metrics, &out.join("test_metrics.json"))?);
    artifacts.push(write_json(&history, &out.join("history.json"))?);

    println!("{}", train_metrics.table("Train metrics"));
    println!("{}", test_metrics.table("Test metrics").green());
    println!("{}", test_eval.predictions.confusion_matrix().display(&class_names));

    // 7. Evaluation plots
    section("Plotting...");
    artifacts.extend(save_evaluation_plots(
        &test_eval.predictions,
        &class_names,
        config.calibration_bins,
        &out,
    )?);
    charts::learning_curves_chart(&history.train_losses, &history.val_accuracies, &out.join("learning_curves.svg"))?;
    artifacts.push(out.join("learning_curves.svg"));

    // 8. Embeddings
    let features = embed_features(&best, &test, config.batch_size, config.image_size, &device)?;
    artifacts.extend(save_embedding_plots(
        &features,
        &test.labels(),
        &class_names,
        config.seed,
        &out,
    )?);

    // 9. Grad-CAM
    match gradcam::save_overlays(
        &trainer.model,
        &test,
        config.gradcam_samples,
        config.image_size,
        &out,
        &device,
    ) {
        Ok(paths) => artifacts.extend(paths),
        Err(e) => warn!("Grad-CAM unavailable: {}", e),
    }

    // 10. Model summary
    section("Model Summary");
    let predictor = Predictor::from_model(best.clone(), class_names.clone(), config.image_size, device.clone());
    let latency = predictor.benchmark(BENCHMARK_ITERATIONS)?;
    let parameters = predictor.parameter_count();
    let model_summary = ModelSummary {
        parameters,
        parameters_millions: parameters as f64 / 1e6,
        checkpoint_size_mb: file_size_mb(&checkpoint_file(&checkpoint)),
        inference_latency_ms: latency.mean_ms,
        backend: crate::backend::backend_name().to_string(),
        image_size: config.image_size,
    };
    println!("  Parameters:      {} ({:.2} M)", format_number(parameters), model_summary.parameters_millions);
    println!("  Checkpoint size: {:.2} MB", model_summary.checkpoint_size_mb);
    println!("  Latency:         {:.2} ms / image", model_summary.inference_latency_ms);
    artifacts.push(write_json(&model_summary, &out.join("model_summary.json"))?);

    // 11. Export
    section("Exporting...");
    let classifier_config = config.classifier_config(num_classes);
    let bundle = export_bundle(&best, &classifier_config, &class_names, &out)?;
    artifacts.push(bundle.record);
    artifacts.push(bundle.metadata);
    artifacts.push(export_weights_json(&best, &classifier_config, &out)?);

    println!();
    println!("{} Reports written to {:?}", "Done.".green().bold(), out);

    Ok(PipelineSummary {
        class_names,
        dataset_size: dataset.len(),
        split: split_stats,
        cross_validation,
        history,
        train_metrics,
        test_metrics,
        model: model_summary,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use crate::dataset::loader::tests::write_fixture;
    use crate::dataset::SplitIndices;
    use crate::export::load_bundle;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_config(data: &Path, out: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: data.to_path_buf(),
            output_dir: out.to_path_buf(),
            image_size: 32,
            batch_size: 4,
            epochs: 2,
            learning_rate: 1e-2,
            base_filters: 4,
            gradcam_samples: 2,
            augmentation: AugmentationConfig::none(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pipeline_writes_every_report() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_fixture(data.path(), &CLASS_NAMES, 8, 24);

        let summary = run_pipeline::<TestBackend>(&tiny_config(data.path(), out.path())).unwrap();

        assert_eq!(summary.dataset_size, 16);
        assert_eq!(summary.class_names, CLASS_NAMES);
        assert!(summary.cross_validation.is_none());
        assert!((0.0..=1.0).contains(&summary.test_metrics.accuracy));

        for name in [
            "split.json",
            "best.mpk",
            "train_metrics.csv",
            "test_metrics.csv",
            "test_metrics.json",
            "history.json",
            "roc.svg",
            "pr.svg",
            "calibration.svg",
            "confusion.svg",
            "confusion_norm.svg",
            "learning_curves.svg",
            "pca.svg",
            "tsne.svg",
            "gradcam_0.png",
            "gradcam_1.png",
            "model_summary.json",
            "malaria_model.mpk",
            "malaria_model.json",
            "malaria_weights.json",
        ] {
            assert!(out.path().join(name).exists(), "missing {}", name);
        }
        assert!(summary.artifacts.iter().all(|p| p.exists()));

        // n = 16 < 20: test set is max(2, 16 / 3) = 5 images
        let split = SplitIndices::load(&out.path().join("split.json")).unwrap();
        assert_eq!(split.test.len(), 5);
        assert_eq!(split.train.len(), 11);

        let (_, metadata) = load_bundle::<NdArray>(out.path(), &Default::default()).unwrap();
        assert_eq!(metadata.class_names, summary.class_names);
        assert_eq!(metadata.parameter_count, summary.model.parameters);
    }

    #[test]
    fn test_pipeline_with_cross_validation() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_fixture(data.path(), &CLASS_NAMES, 4, 16);

        let config = PipelineConfig {
            folds: 2,
            epochs: 1,
            gradcam_samples: 0,
            ..tiny_config(data.path(), out.path())
        };
        let summary = run_pipeline::<TestBackend>(&config).unwrap();

        let cv = summary.cross_validation.unwrap();
        assert_eq!(cv.folds.len(), 2);
        assert!(out.path().join("cv_metrics.csv").exists());
        assert!(out.path().join("cv_fold1.mpk").exists());
        // 2 test images: PCA only
        assert!(out.path().join("pca.svg").exists());
        assert!(!out.path().join("tsne.svg").exists());
        assert!(!out.path().join("gradcam_0.png").exists());
    }

    #[test]
    fn test_pipeline_rejects_single_class() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_fixture(data.path(), &["Parasitized"], 6, 16);

        let result = run_pipeline::<TestBackend>(&tiny_config(data.path(), out.path()));
        assert!(matches!(result, Err(MalariaError::Dataset(_))));
    }

    #[test]
    fn test_embed_features_shape() {
        let config = crate::training::trainer::tests::toy_config(1);
        let device = Default::default();
        let model = config.classifier_config(2).init::<NdArray>(&device);
        let data = crate::training::trainer::tests::toy_dataset(3);

        let features = embed_features(&model, &data, 4, config.image_size, &device).unwrap();
        assert_eq!(features.dim(), (6, 32));
    }
}
