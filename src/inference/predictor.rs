//! Inference Predictor Module
//!
//! Single-image classification with an exported model bundle. Used by the
//! CLI `infer` command and by the HTTP server.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::backend::Backend;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::burn_dataset::normalized_images;
use crate::dataset::diagnosis_for;
use crate::export::{load_bundle, BundleMetadata};
use crate::model::cnn::MalariaClassifier;
use crate::utils::error::{MalariaError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub class_index: usize,
    pub class_name: String,
    /// `parasitized` or `uninfected`
    pub diagnosis: String,
    /// Softmax probability of the predicted class
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    /// Wall-clock time of decode, preprocessing and forward pass, in seconds
    pub processing_time: f64,
}

impl Prediction {
    fn from_probabilities(probabilities: Vec<f32>, class_names: &[String], processing_time: f64) -> Self {
        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Self {
            class_index,
            class_name: class_names
                .get(class_index)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", class_index)),
            diagnosis: diagnosis_for(class_index).to_string(),
            confidence,
            probabilities,
            processing_time,
        }
    }

    pub fn display(&self) -> String {
        let mut output = format!(
            "Prediction: {} ({})\nConfidence: {:.2}%\nProcessing time: {:.2} ms\n",
            self.class_name,
            self.diagnosis,
            self.confidence * 100.0,
            self.processing_time * 1000.0
        );
        for (i, p) in self.probabilities.iter().enumerate() {
            output.push_str(&format!("  class {}: {:.4}\n", i, p));
        }
        output
    }
}

/// Latency of repeated single-image predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub iterations: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub throughput_fps: f64,
}

/// Loaded model plus the preprocessing it was trained with
pub struct Predictor<B: Backend> {
    model: MalariaClassifier<B>,
    class_names: Vec<String>,
    image_size: usize,
    augmenter: Augmenter,
    device: B::Device,
    model_name: String,
}

impl<B: Backend> Predictor<B> {
    /// Load a bundle written by [`crate::export::export_bundle`]
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        let (model, metadata) = load_bundle::<B>(dir, device)?;
        let BundleMetadata {
            class_names,
            image_size,
            model_name,
            ..
        } = metadata;
        Ok(Self::from_parts(model, class_names, image_size, model_name, device.clone()))
    }

    /// Wrap an in-memory model (evaluation mode)
    pub fn from_model(model: MalariaClassifier<B>, class_names: Vec<String>, image_size: usize, device: B::Device) -> Self {
        Self::from_parts(model, class_names, image_size, "MalariaClassifier".to_string(), device)
    }

    fn from_parts(
        model: MalariaClassifier<B>,
        class_names: Vec<String>,
        image_size: usize,
        model_name: String,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            class_names,
            image_size,
            augmenter: Augmenter::no_augmentation(image_size as u32),
            device,
            model_name,
        }
    }

    /// Classify an encoded image (any format the `image` crate decodes)
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let start = Instant::now();
        if bytes.is_empty() {
            return Err(MalariaError::InvalidInput("empty image".to_string()));
        }
        let image = image::load_from_memory(bytes)?.to_rgb8();
        self.predict_started(&image, start)
    }

    pub fn predict_image(&self, image: &RgbImage) -> Result<Prediction> {
        self.predict_started(image, Instant::now())
    }

    pub fn predict_file(&self, path: &Path) -> Result<Prediction> {
        if !path.exists() {
            return Err(MalariaError::PathNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        self.predict_bytes(&bytes)
            .map_err(|e| match e {
                MalariaError::Image(err) => MalariaError::ImageLoad(path.to_path_buf(), err.to_string()),
                other => other,
            })
    }

    fn predict_started(&self, image: &RgbImage, start: Instant) -> Result<Prediction> {
        let data = self.augmenter.preprocess(image, None);
        let input = normalized_images::<B>(data, 1, self.image_size, &self.device);

        let probabilities: Vec<f32> = self
            .model
            .forward_softmax(input)
            .into_data()
            .to_vec()
            .map_err(|e| MalariaError::Inference(format!("{:?}", e)))?;

        let prediction = Prediction::from_probabilities(probabilities, &self.class_names, start.elapsed().as_secs_f64());
        debug!(
            "Predicted {} ({:.3}) in {:.2} ms",
            prediction.class_name,
            prediction.confidence,
            prediction.processing_time * 1000.0
        );
        Ok(prediction)
    }

    /// Classify every image file directly inside `dir`, in path order
    pub fn predict_dir(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<Prediction>)>> {
        if !dir.is_dir() {
            return Err(MalariaError::PathNotFound(dir.to_path_buf()));
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| crate::dataset::loader::is_image_file(p))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let prediction = self.predict_file(&path);
                (path, prediction)
            })
            .collect())
    }

    /// Time `iterations` predictions of a synthetic image after 3 warmup runs
    pub fn benchmark(&self, iterations: usize) -> Result<BenchmarkResult> {
        let iterations = iterations.max(1);
        let size = self.image_size as u32;
        let image = RgbImage::from_fn(size, size, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));

        for _ in 0..3 {
            self.predict_image(&image)?;
        }

        let mut times = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let start = Instant::now();
            self.predict_image(&image)?;
            times.push(start.elapsed().as_secs_f64() * 1000.0);
        }

        let mean_ms = times.iter().sum::<f64>() / times.len() as f64;
        Ok(BenchmarkResult {
            iterations,
            mean_ms,
            min_ms: times.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: times.iter().copied().fold(0.0, f64::max),
            throughput_fps: if mean_ms > 0.0 { 1000.0 / mean_ms } else { 0.0 },
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.model.parameter_count()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_bundle;
    use crate::model::cnn::MalariaClassifierConfig;
    use burn_ndarray::NdArray;
    use std::io::Cursor;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn bundle_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let config = MalariaClassifierConfig::new().with_input_size(32).with_base_filters(4);
        let model = config.init::<TestBackend>(&Default::default());
        let names = vec!["Parasitized".to_string(), "Uninfected".to_string()];
        export_bundle(&model, &config, &names, dir.path()).unwrap();
        dir
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 90]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
        bytes
    }

    #[test]
    fn test_predict_bytes() {
        let dir = bundle_dir();
        let predictor = Predictor::<TestBackend>::load(dir.path(), &Default::default()).unwrap();

        let prediction = predictor.predict_bytes(&png_bytes()).unwrap();
        assert!(prediction.class_index < 2);
        assert_eq!(prediction.probabilities.len(), 2);
        assert!((prediction.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(prediction.confidence, prediction.probabilities[prediction.class_index]);
        assert_eq!(prediction.diagnosis, diagnosis_for(prediction.class_index));
        assert!(prediction.processing_time >= 0.0);
    }

    #[test]
    fn test_predict_garbage_bytes_fails() {
        let dir = bundle_dir();
        let predictor = Predictor::<TestBackend>::load(dir.path(), &Default::default()).unwrap();
        assert!(matches!(predictor.predict_bytes(b"not an image"), Err(MalariaError::Image(_))));
        assert!(matches!(predictor.predict_bytes(&[]), Err(MalariaError::InvalidInput(_))));
    }

    #[test]
    fn test_predict_file_and_dir() {
        let bundle = bundle_dir();
        let predictor = Predictor::<TestBackend>::load(bundle.path(), &Default::default()).unwrap();

        let images = TempDir::new().unwrap();
        std::fs::write(images.path().join("b.png"), png_bytes()).unwrap();
        std::fs::write(images.path().join("a.png"), png_bytes()).unwrap();
        std::fs::write(images.path().join("notes.txt"), "skip").unwrap();

        assert!(predictor.predict_file(&images.path().join("a.png")).is_ok());
        assert!(matches!(
            predictor.predict_file(&images.path().join("missing.png")),
            Err(MalariaError::PathNotFound(_))
        ));

        let results = predictor.predict_dir(images.path()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].0.ends_with("a.png"));
    }

    #[test]
    fn test_benchmark_and_metadata() {
        let dir = bundle_dir();
        let predictor = Predictor::<TestBackend>::load(dir.path(), &Default::default()).unwrap();

        let result = predictor.benchmark(2).unwrap();
        assert_eq!(result.iterations, 2);
        assert!(result.min_ms <= result.mean_ms && result.mean_ms <= result.max_ms);
        assert_eq!(predictor.image_size(), 32);
        assert_eq!(predictor.model_name(), "MalariaClassifier");
        let reference = MalariaClassifierConfig::new()
            .with_input_size(32)
            .with_base_filters(4)
            .init::<TestBackend>(&Default::default());
        assert_eq!(predictor.parameter_count(), reference.parameter_count());
    }
}
