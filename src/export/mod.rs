//! Model export
//!
//! Two artifacts are produced from a trained classifier:
//! - a self-contained bundle: full-precision named MessagePack record plus a
//!   JSON sidecar with the network config, class names and preprocessing
//!   constants. [`load_bundle`] restores a ready-to-run model from it.
//! - a JSON dump of every named tensor (shape + flat data) for conversion
//!   into other runtimes such as PyTorch / ONNX.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::cnn::{ConvBlock, MalariaClassifier, MalariaClassifierConfig};
use crate::utils::error::{MalariaError, Result};
use crate::{IMAGENET_MEAN, IMAGENET_STD};

/// File stem of the bundle record (the recorder appends `.mpk`)
pub const BUNDLE_STEM: &str = "malaria_model";
pub const BUNDLE_METADATA_FILE: &str = "malaria_model.json";
pub const WEIGHTS_FILE: &str = "malaria_weights.json";

const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Sidecar describing how to rebuild and feed the exported model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub format_version: u32,
    pub model_name: String,
    pub model: MalariaClassifierConfig,
    pub class_names: Vec<String>,
    pub image_size: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub parameter_count: usize,
    pub library_version: String,
    pub exported_at: String,
}

#[derive(Debug, Clone)]
pub struct BundlePaths {
    pub record: PathBuf,
    pub metadata: PathBuf,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Write `malaria_model.mpk` and `malaria_model.json` into `dir`
pub fn export_bundle<B: Backend>(
    model: &MalariaClassifier<B>,
    config: &MalariaClassifierConfig,
    class_names: &[String],
    dir: &Path,
) -> Result<BundlePaths> {
    if class_names.len() != config.num_classes {
        return Err(MalariaError::Export(format!(
            "{} class names for a {}-class model",
            class_names.len(),
            config.num_classes
        )));
    }
    fs::create_dir_all(dir)?;

    let stem = dir.join(BUNDLE_STEM);
    model
        .clone()
        .save_file(stem.clone(), &recorder())
        .map_err(|e| MalariaError::Export(format!("Failed to write {:?}: {:?}", stem, e)))?;

    let metadata = BundleMetadata {
        format_version: BUNDLE_FORMAT_VERSION,
        model_name: "MalariaClassifier".to_string(),
        model: config.clone(),
        class_names: class_names.to_vec(),
        image_size: config.input_size,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        parameter_count: model.parameter_count(),
        library_version: crate::VERSION.to_string(),
        exported_at: chrono::Local::now().to_rfc3339(),
    };
    let metadata_path = dir.join(BUNDLE_METADATA_FILE);
    fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    let paths = BundlePaths {
        record: stem.with_extension("mpk"),
        metadata: metadata_path,
    };
    info!("Exported model bundle to {:?}", paths.record);
    Ok(paths)
}

/// Restore a model and its metadata from a bundle directory
pub fn load_bundle<B: Backend>(dir: &Path, device: &B::Device) -> Result<(MalariaClassifier<B>, BundleMetadata)> {
    let metadata_path = dir.join(BUNDLE_METADATA_FILE);
    if !metadata_path.exists() {
        return Err(MalariaError::PathNotFound(metadata_path));
    }
    let metadata: BundleMetadata = serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;
    if metadata.format_version != BUNDLE_FORMAT_VERSION {
        return Err(MalariaError::Model(format!(
            "unsupported bundle format version {}",
            metadata.format_version
        )));
    }

    let stem = dir.join(BUNDLE_STEM);
    let model = metadata
        .model
        .init::<B>(device)
        .load_file(stem.clone(), &recorder(), device)
        .map_err(|e| MalariaError::Model(format!("Failed to load {:?}: {:?}", stem, e)))?;

    Ok((model, metadata))
}

/// One exported tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Contents of `malaria_weights.json`
///
/// Linear weights keep Burn's `[in, out]` layout; transpose them for
/// PyTorch's `[out, in]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightExport {
    pub model: MalariaClassifierConfig,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub tensors: BTreeMap<String, NamedTensor>,
}

fn tensor_to_data<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<NamedTensor> {
    let shape = tensor.dims().to_vec();
    let data = tensor
        .into_data()
        .to_vec()
        .map_err(|e| MalariaError::Export(format!("{:?}", e)))?;
    Ok(NamedTensor { shape, data })
}

fn block_tensors<B: Backend>(
    prefix: &str,
    block: &ConvBlock<B>,
    out: &mut BTreeMap<String, NamedTensor>,
) -> Result<()> {
    out.insert(format!("{}.conv.weight", prefix), tensor_to_data(block.conv.weight.val())?);
    if let Some(bias) = &block.conv.bias {
        out.insert(format!("{}.conv.bias", prefix), tensor_to_data(bias.val())?);
    }
    out.insert(format!("{}.bn.gamma", prefix), tensor_to_data(block.bn.gamma.val())?);
    out.insert(format!("{}.bn.beta", prefix), tensor_to_data(block.bn.beta.val())?);
    out.insert(format!("{}.bn.running_mean", prefix), tensor_to_data(block.bn.running_mean.value())?);
    out.insert(format!("{}.bn.running_var", prefix), tensor_to_data(block.bn.running_var.value())?);
    Ok(())
}

/// Every parameter and batch-norm buffer, keyed by module path
pub fn named_tensors<B: Backend>(model: &MalariaClassifier<B>) -> Result<BTreeMap<String, NamedTensor>> {
    let mut tensors = BTreeMap::new();
    for (i, block) in model.backbone.blocks().into_iter().enumerate() {
        block_tensors(&format!("backbone.block{}", i + 1), block, &mut tensors)?;
    }

    tensors.insert("head.fc.weight".to_string(), tensor_to_data(model.head.fc.weight.val())?);
    if let Some(bias) = &model.head.fc.bias {
        tensors.insert("head.fc.bias".to_string(), tensor_to_data(bias.val())?);
    }
    Ok(tensors)
}

/// Write `malaria_weights.json` into `dir`
pub fn export_weights_json<B: Backend>(
    model: &MalariaClassifier<B>,
    config: &MalariaClassifierConfig,
    dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let export = WeightExport {
        model: config.clone(),
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        tensors: named_tensors(model)?,
    };

    let path = dir.join(WEIGHTS_FILE);
    fs::write(&path, serde_json::to_string(&export)?)?;
    info!("Exported {} named tensors to {:?}", export.tensors.len(), path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn small_config() -> MalariaClassifierConfig {
        MalariaClassifierConfig::new().with_input_size(32).with_base_filters(4)
    }

    fn names() -> Vec<String> {
        vec!["Parasitized".to_string(), "Uninfected".to_string()]
    }

    #[test]
    fn test_bundle_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);

        let paths = export_bundle(&model, &config, &names(), dir.path()).unwrap();
        assert!(paths.record.exists());
        assert!(paths.metadata.exists());

        let (restored, metadata) = load_bundle::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(metadata.class_names, names());
        assert_eq!(metadata.image_size, 32);
        assert_eq!(metadata.parameter_count, model.parameter_count());

        let x = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let a: Vec<f32> = model.forward(x.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = restored.forward(x).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bundle_rejects_wrong_class_names() {
        let dir = TempDir::new().unwrap();
        let config = small_config();
        let model = config.init::<TestBackend>(&Default::default());
        let result = export_bundle(&model, &config, &["only".to_string()], dir.path());
        assert!(matches!(result, Err(MalariaError::Export(_))));
    }

    #[test]
    fn test_load_bundle_missing_dir() {
        let dir = TempDir::new().unwrap();
        let result = load_bundle::<TestBackend>(&dir.path().join("nothing"), &Default::default());
        assert!(matches!(result, Err(MalariaError::PathNotFound(_))));
    }

    #[test]
    fn test_weights_json_lists_every_tensor() {
        let dir = TempDir::new().unwrap();
        let config = small_config();
        let model = config.init::<TestBackend>(&Default::default());

        let path = export_weights_json(&model, &config, dir.path()).unwrap();
        let export: WeightExport = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        // 5 blocks x (conv weight, conv bias, 4 batch-norm tensors) + fc weight and bias
        assert_eq!(export.tensors.len(), 32);
        assert_eq!(export.tensors["backbone.block1.conv.weight"].shape, vec![4, 3, 3, 3]);
        assert_eq!(export.tensors["head.fc.weight"].shape, vec![32, 2]);

        let total: usize = export
            .tensors
            .iter()
            .filter(|(name, _)| !name.contains("running_"))
            .map(|(_, t)| t.data.len())
            .sum();
        assert_eq!(total, model.parameter_count());
    }
}
