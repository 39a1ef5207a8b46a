//! Malaria Detect CLI
//!
//! Entry point for training, evaluating, exporting and running the
//! blood-smear cell classifier.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use malaria_detect::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use malaria_detect::config::PipelineConfig;
use malaria_detect::dataset::augmentation::AugmentationConfig;
use malaria_detect::dataset::{MalariaBurnDataset, MalariaDataset, MalariaItem};
use malaria_detect::export::{export_bundle, export_weights_json, load_bundle};
use malaria_detect::inference::{Predictor, BENCHMARK_ITERATIONS};
use malaria_detect::training::pipeline::{embed_features, run_pipeline};
use malaria_detect::training::trainer::{evaluate_model, load_classifier};
use malaria_detect::utils::format_number;
use malaria_detect::utils::logging::{init_logging, LogConfig};
use malaria_detect::visualization::{gradcam, save_embedding_plots, save_evaluation_plots};

/// Malaria blood-smear cell classification with Burn
#[derive(Parser, Debug)]
#[command(name = "malaria_detect")]
#[command(version)]
#[command(about = "Parasitized vs. uninfected cell classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: split, train, evaluate, plot and export
    Train(TrainArgs),

    /// Evaluate an exported model on a labeled image folder
    Evaluate {
        /// Directory holding malaria_model.mpk / malaria_model.json
        #[arg(short, long, default_value = "reports", env = "MALARIA_MODEL_DIR")]
        model_dir: PathBuf,

        /// Image-folder dataset (one subdirectory per class)
        #[arg(short, long, default_value = "data/test", env = "MALARIA_DATA_DIR")]
        data_dir: PathBuf,

        /// Where metrics and plots are written
        #[arg(short, long, default_value = "reports/evaluation")]
        output_dir: PathBuf,

        #[arg(short, long, default_value = "8")]
        batch_size: usize,

        #[arg(long, default_value = "10")]
        calibration_bins: usize,
    },

    /// Classify a single image or every image in a directory
    Infer {
        /// Path to input image or directory
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "reports", env = "MALARIA_MODEL_DIR")]
        model_dir: PathBuf,

        /// Also report mean latency over this many runs
        #[arg(long)]
        benchmark: Option<usize>,
    },

    /// Export a training checkpoint to the bundle and JSON weight formats
    Export {
        /// Checkpoint path without extension (e.g. reports/best)
        #[arg(short, long, default_value = "reports/best")]
        checkpoint: PathBuf,

        /// Pipeline config of the run that produced the checkpoint
        #[arg(long)]
        config: Option<PathBuf>,

        /// Class names in label order
        #[arg(long, value_delimiter = ',', default_value = "Parasitized,Uninfected")]
        class_names: Vec<String>,

        #[arg(short, long, default_value = "reports")]
        output_dir: PathBuf,
    },

    /// Show dataset statistics and diagnostics
    Stats {
        #[arg(short, long, default_value = "data/train", env = "MALARIA_DATA_DIR")]
        data_dir: PathBuf,

        /// Number of images to open and inspect
        #[arg(long, default_value = "5")]
        diagnostics: usize,
    },

    /// Write Grad-CAM overlays for the given images
    Gradcam {
        /// Image files
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[arg(short, long, default_value = "reports", env = "MALARIA_MODEL_DIR")]
        model_dir: PathBuf,

        #[arg(short, long, default_value = "reports/gradcam")]
        output_dir: PathBuf,
    },
}

/// Training options; every flag overrides the matching config field
#[derive(Args, Debug)]
struct TrainArgs {
    /// JSON config loaded before applying flags
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, env = "MALARIA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    weight_decay: Option<f64>,

    /// Epochs without improvement before stopping
    #[arg(long)]
    patience: Option<usize>,

    #[arg(long)]
    min_delta: Option<f64>,

    /// Cross-validation folds (0 disables)
    #[arg(long)]
    folds: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    image_size: Option<usize>,

    #[arg(long)]
    test_fraction: Option<f64>,

    #[arg(long)]
    dropout: Option<f64>,

    #[arg(long)]
    base_filters: Option<usize>,

    /// Checkpoint whose backbone initialises the model
    #[arg(long)]
    pretrained_backbone: Option<PathBuf>,

    #[arg(long, default_value = "false")]
    freeze_backbone: bool,

    #[arg(long)]
    calibration_bins: Option<usize>,

    #[arg(long)]
    gradcam_samples: Option<usize>,

    /// Image decoding threads (0 = all cores)
    #[arg(long)]
    num_workers: Option<usize>,

    /// Train without data augmentation
    #[arg(long, default_value = "false")]
    no_augmentation: bool,
}

impl TrainArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {:?}", path))?,
            None => PipelineConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        apply!(
            data_dir,
            output_dir,
            epochs,
            batch_size,
            learning_rate,
            weight_decay,
            patience,
            min_delta,
            folds,
            seed,
            image_size,
            test_fraction,
            dropout,
            base_filters,
            calibration_bins,
            gradcam_samples,
            num_workers
        );

        if self.pretrained_backbone.is_some() {
            config.pretrained_backbone = self.pretrained_backbone;
        }
        if self.freeze_backbone {
            config.freeze_backbone = true;
        }
        if self.no_augmentation {
            config.augmentation = AugmentationConfig::none();
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train(args) => cmd_train(args)?,
        Commands::Evaluate {
            model_dir,
            data_dir,
            output_dir,
            batch_size,
            calibration_bins,
        } => cmd_evaluate(&model_dir, &data_dir, &output_dir, batch_size, calibration_bins)?,
        Commands::Infer {
            input,
            model_dir,
            benchmark,
        } => cmd_infer(&input, &model_dir, benchmark)?,
        Commands::Export {
            checkpoint,
            config,
            class_names,
            output_dir,
        } => cmd_export(&checkpoint, config.as_deref(), &class_names, &output_dir)?,
        Commands::Stats { data_dir, diagnostics } => cmd_stats(&data_dir, diagnostics)?,
        Commands::Gradcam {
            images,
            model_dir,
            output_dir,
        } => cmd_gradcam(&images, &model_dir, &output_dir)?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════╗
 ║   Malaria Detect                                         ║
 ║   Blood-smear cell classification with Burn + Rust       ║
 ╚══════════════════════════════════════════════════════════╝
  "#
        .red()
    );
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let config = args.into_config()?;
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data:          {:?}", config.data_dir);
    println!("  Output:        {:?}", config.output_dir);
    println!("  Backend:       {}", backend_name());
    println!("  Epochs:        {} (patience {})", config.epochs, config.patience);
    println!("  Batch size:    {}", config.batch_size);
    println!("  Learning rate: {}", config.learning_rate);
    println!("  Image size:    {}", config.image_size);
    println!("  Folds:         {}", config.folds);

    let summary = run_pipeline::<TrainingBackend>(&config)?;

    println!();
    println!("{}", "Summary".green().bold());
    println!("  Test accuracy: {:.2}%", summary.test_metrics.accuracy * 100.0);
    println!("  Test F1:       {:.4}", summary.test_metrics.f1);
    match summary.test_metrics.roc_auc {
        Some(auc) => println!("  Test ROC-AUC:  {:.4}", auc),
        None => println!("  Test ROC-AUC:  n/a (single class in test set)"),
    }
    if let Some(best) = summary.history.best_epoch {
        println!("  Best epoch:    {}", best + 1);
    }
    Ok(())
}

fn cmd_evaluate(
    model_dir: &Path,
    data_dir: &Path,
    output_dir: &Path,
    batch_size: usize,
    calibration_bins: usize,
) -> Result<()> {
    let device = default_device();
    let (model, metadata) = load_bundle::<DefaultBackend>(model_dir, &device)?;
    info!("Loaded {} from {:?}", metadata.model_name, model_dir);

    let index = MalariaDataset::new(data_dir)?;
    if index.class_names != metadata.class_names {
        bail!(
            "dataset classes {:?} do not match model classes {:?}",
            index.class_names,
            metadata.class_names
        );
    }
    let dataset = MalariaBurnDataset::new_cached(index.path_labels())?;

    let eval = evaluate_model(&model, &dataset, batch_size, metadata.image_size, &device)?;
    let metrics = eval.predictions.metrics()?;

    std::fs::create_dir_all(output_dir)?;
    metrics.save_csv(&output_dir.join("metrics.csv"))?;
    std::fs::write(output_dir.join("metrics.json"), serde_json::to_string_pretty(&metrics)?)?;

    println!("{}", metrics.table("Evaluation metrics").green());
    println!("{}", eval.predictions.confusion_matrix().display(&metadata.class_names));

    save_evaluation_plots(&eval.predictions, &metadata.class_names, calibration_bins, output_dir)?;
    let features = embed_features(&model, &dataset, batch_size, metadata.image_size, &device)?;
    save_embedding_plots(
        &features,
        &dataset.labels(),
        &metadata.class_names,
        malaria_detect::DEFAULT_SEED,
        output_dir,
    )?;

    println!("{} Results written to {:?}", "Done.".green().bold(), output_dir);
    Ok(())
}

fn cmd_infer(input: &Path, model_dir: &Path, benchmark: Option<usize>) -> Result<()> {
    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(model_dir, &device)?;
    println!(
        "Model: {} ({} parameters)",
        predictor.model_name(),
        format_number(predictor.parameter_count())
    );

    if input.is_dir() {
        for (path, result) in predictor.predict_dir(input)? {
            match result {
                Ok(p) => println!(
                    "{:<50} {:<12} {:.2}%",
                    path.display().to_string(),
                    p.diagnosis,
                    p.confidence * 100.0
                ),
                Err(e) => println!("{:<50} {} {}", path.display().to_string(), "error".red(), e),
            }
        }
    } else {
        let prediction = predictor.predict_file(input)?;
        println!();
        println!("{}", prediction.display());
    }

    if let Some(iterations) = benchmark {
        let result = predictor.benchmark(if iterations == 0 { BENCHMARK_ITERATIONS } else { iterations })?;
        println!(
            "Latency: {:.2} ms mean ({:.2}-{:.2}), {:.1} images/s",
            result.mean_ms, result.min_ms, result.max_ms, result.throughput_fps
        );
    }
    Ok(())
}

fn cmd_export(checkpoint: &Path, config: Option<&Path>, class_names: &[String], output_dir: &Path) -> Result<()> {
    let pipeline_config = match config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let classifier_config = pipeline_config.classifier_config(class_names.len());

    let device = default_device();
    let model = load_classifier::<DefaultBackend>(&classifier_config, checkpoint, &device)?;

    let bundle = export_bundle(&model, &classifier_config, class_names, output_dir)?;
    let weights = export_weights_json(&model, &classifier_config, output_dir)?;

    println!("{}", "Export complete!".green().bold());
    println!("  Bundle:  {:?}", bundle.record);
    println!("  Config:  {:?}", bundle.metadata);
    println!("  Weights: {:?}", weights);
    Ok(())
}

fn cmd_stats(data_dir: &Path, diagnostics: usize) -> Result<()> {
    if !data_dir.exists() {
        println!("{} Dataset directory not found: {:?}", "Error:".red(), data_dir);
        println!();
        println!("Expected structure:");
        println!("  {}/Parasitized/*.png", data_dir.display());
        println!("  {}/Uninfected/*.png", data_dir.display());
        return Ok(());
    }

    let dataset = MalariaDataset::new(data_dir)?;
    dataset.get_stats().print();

    if diagnostics > 0 {
        println!();
        println!("{}", "Sample diagnostics:".cyan().bold());
        for diag in dataset.diagnostics(diagnostics) {
            match diag.dimensions {
                Some((w, h)) => println!("  #{:<4} {:<14} {}x{}", diag.index, diag.class_name, w, h),
                None => println!("  #{:<4} {:<14} {}", diag.index, diag.class_name, "unreadable".red()),
            }
        }
    }
    Ok(())
}

fn cmd_gradcam(images: &[PathBuf], model_dir: &Path, output_dir: &Path) -> Result<()> {
    let device = default_device();
    let (model, metadata) = load_bundle::<TrainingBackend>(model_dir, &device)?;

    // Labels are unused by Grad-CAM
    let items = images
        .iter()
        .map(|path| MalariaItem::from_path(path, 0))
        .collect::<malaria_detect::Result<Vec<_>>>()?;
    let dataset = MalariaBurnDataset::from_items(items);

    let written = gradcam::save_overlays(&model, &dataset, images.len(), metadata.image_size, output_dir, &device)?;
    for (source, target) in images.iter().zip(&written) {
        println!("  {:?} -> {:?}", source, target);
    }
    Ok(())
}
