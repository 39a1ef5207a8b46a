//! Weight Export Tool
//!
//! Dumps every parameter and batch-norm statistic of a trained classifier
//! to `malaria_weights.json` for loading into other frameworks.
//!
//! Usage:
//!   cargo run --release --bin export_weights -- --model-dir reports
//!   cargo run --release --bin export_weights -- --checkpoint reports/best --config reports/config.json

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use malaria_detect::backend::{default_device, DefaultBackend};
use malaria_detect::config::PipelineConfig;
use malaria_detect::export::{export_weights_json, load_bundle, named_tensors};
use malaria_detect::training::load_classifier;
use malaria_detect::NUM_CLASSES;

/// Export Burn model weights to JSON
#[derive(Parser, Debug)]
#[command(name = "export_weights")]
#[command(about = "Export trained classifier weights as named JSON tensors")]
struct Args {
    /// Exported bundle directory (malaria_model.mpk + malaria_model.json)
    #[arg(long, conflicts_with = "checkpoint")]
    model_dir: Option<PathBuf>,

    /// Training checkpoint without extension
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Pipeline config matching the checkpoint
    #[arg(long, requires = "checkpoint")]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "reports")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let device = default_device();

    println!("=== Burn Weight Export Tool ===");

    let (model, classifier_config) = match (&args.model_dir, &args.checkpoint) {
        (Some(dir), _) => {
            println!("Loading bundle from: {:?}", dir);
            let (model, metadata) = load_bundle::<DefaultBackend>(dir, &device)?;
            (model, metadata.model)
        }
        (None, Some(checkpoint)) => {
            println!("Loading checkpoint from: {:?}", checkpoint);
            let pipeline = match &args.config {
                Some(path) => PipelineConfig::load(path)?,
                None => PipelineConfig::default(),
            };
            let config = pipeline.classifier_config(NUM_CLASSES);
            let model = load_classifier::<DefaultBackend>(&config, checkpoint, &device)?;
            (model, config)
        }
        (None, None) => bail!("pass either --model-dir or --checkpoint"),
    };

    let path = export_weights_json(&model, &classifier_config, &args.output)?;

    println!();
    println!("Export complete: {:?}", path);
    println!();
    println!("Weight shapes:");
    for (name, tensor) in named_tensors(&model)? {
        if name.ends_with("weight") {
            println!("  {}: {:?}", name, tensor.shape);
        }
    }

    Ok(())
}
