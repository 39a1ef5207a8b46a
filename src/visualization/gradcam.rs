//! Grad-CAM saliency overlays
//!
//! The backbone runs in inference mode on the inner backend. Its last
//! feature map is lifted back onto the autodiff backend as a fresh leaf, so
//! backpropagating the predicted-class logit through the head yields the
//! gradient with respect to the feature map only.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    tensor::{activation::relu, backend::AutodiffBackend, Tensor, TensorData},
};
use image::{imageops, imageops::FilterType, ImageBuffer, Luma, Rgb, RgbImage};
use tracing::{debug, info};

use crate::dataset::{MalariaBatcher, MalariaBurnDataset};
use crate::model::cnn::MalariaClassifier;
use crate::utils::error::{MalariaError, Result};
use crate::{IMAGENET_MEAN, IMAGENET_STD};

/// Weight of the input image in the blended overlay
pub const IMAGE_WEIGHT: f32 = 0.5;

/// Class activation map of one image at feature-map resolution
#[derive(Debug, Clone)]
pub struct ClassActivation {
    pub class_index: usize,
    /// Row-major `[height, width]`, min-max normalised to [0, 1]
    pub heatmap: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

pub struct GradCam<B: AutodiffBackend> {
    model: MalariaClassifier<B>,
    inner: MalariaClassifier<B::InnerBackend>,
    device: B::Device,
}

impl<B: AutodiffBackend> GradCam<B> {
    pub fn new(model: MalariaClassifier<B>, device: B::Device) -> Self {
        let inner = model.valid();
        Self { model, inner, device }
    }

    /// Activation maps for a batch of normalized images `[N, 3, H, W]`
    pub fn compute(&self, images: Tensor<B::InnerBackend, 4>) -> Result<Vec<ClassActivation>> {
        let features = self.inner.features(images);
        let [n, _, height, width] = features.dims();

        let leaf = Tensor::<B, 4>::from_inner(features.clone()).require_grad();
        // Head without dropout
        let logits = self.model.head.fc.forward(self.model.head.pool(leaf.clone()));
        let num_classes = logits.dims()[1];

        let scores: Vec<f32> = logits
            .clone()
            .inner()
            .into_data()
            .to_vec()
            .map_err(|e| MalariaError::Visualization(format!("{:?}", e)))?;
        let predicted: Vec<usize> = scores.chunks(num_classes).map(argmax).collect();

        let mut one_hot = vec![0.0f32; n * num_classes];
        for (i, &class) in predicted.iter().enumerate() {
            one_hot[i * num_classes + class] = 1.0;
        }
        let mask = Tensor::<B, 2>::from_data(TensorData::new(one_hot, [n, num_classes]), &self.device);

        let grads = (logits * mask).sum().backward();
        let gradient = leaf
            .grad(&grads)
            .ok_or_else(|| MalariaError::Visualization("feature map received no gradient".to_string()))?;

        // Channel weights: spatial mean of the gradient
        let weights = gradient.mean_dim(3).mean_dim(2);
        let cam = relu((features * weights).sum_dim(1));

        let values: Vec<f32> = cam
            .into_data()
            .to_vec()
            .map_err(|e| MalariaError::Visualization(format!("{:?}", e)))?;

        Ok(values
            .chunks(height * width)
            .zip(predicted)
            .map(|(map, class_index)| ClassActivation {
                class_index,
                heatmap: min_max_normalize(map),
                height,
                width,
            })
            .collect())
    }
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    values
        .iter()
        .map(|&v| if range > 1e-12 { (v - min) / range } else { 0.0 })
        .collect()
}

/// Jet colormap, `t` in [0, 1] -> RGB in [0, 1]
pub fn jet(t: f32) -> [f32; 3] {
    let channel = |offset: f32| (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Undo ImageNet normalization of one CHW image
pub fn denormalize(chw: &[f32], size: usize) -> RgbImage {
    let plane = size * size;
    ImageBuffer::from_fn(size as u32, size as u32, |x, y| {
        let idx = y as usize * size + x as usize;
        let channel = |c: usize| {
            let v = chw[c * plane + idx] * IMAGENET_STD[c] + IMAGENET_MEAN[c];
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        Rgb([channel(0), channel(1), channel(2)])
    })
}

/// Upsample the activation map bilinearly and blend a jet heatmap over `image`
///
/// The blend is rescaled so its brightest channel is 1.
pub fn overlay(image: &RgbImage, activation: &ClassActivation) -> Result<RgbImage> {
    let small: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(
        activation.width as u32,
        activation.height as u32,
        activation.heatmap.clone(),
    )
    .ok_or_else(|| MalariaError::Visualization("heatmap size does not match its dimensions".to_string()))?;
    let (w, h) = image.dimensions();
    let mask = imageops::resize(&small, w, h, FilterType::Triangle);

    let mut blended: Vec<[f32; 3]> = Vec::with_capacity((w * h) as usize);
    let mut peak = 0.0f32;
    for (pixel, m) in image.pixels().zip(mask.pixels()) {
        let heat = jet(m.0[0].clamp(0.0, 1.0));
        let mut out = [0.0f32; 3];
        for c in 0..3 {
            out[c] = (1.0 - IMAGE_WEIGHT) * heat[c] + IMAGE_WEIGHT * pixel.0[c] as f32 / 255.0;
            peak = peak.max(out[c]);
        }
        blended.push(out);
    }
    let peak = if peak > 0.0 { peak } else { 1.0 };

    Ok(ImageBuffer::from_fn(w, h, |x, y| {
        let v = blended[(y * w + x) as usize];
        Rgb([
            (v[0] / peak * 255.0).round() as u8,
            (v[1] / peak * 255.0).round() as u8,
            (v[2] / peak * 255.0).round() as u8,
        ])
    }))
}

/// Write `gradcam_{i}.png` for the first `count` items of `dataset`
pub fn save_overlays<B: AutodiffBackend>(
    model: &MalariaClassifier<B>,
    dataset: &MalariaBurnDataset,
    count: usize,
    image_size: usize,
    output_dir: &Path,
    device: &B::Device,
) -> Result<Vec<PathBuf>> {
    let count = count.min(dataset.len());
    if count == 0 {
        info!("Grad-CAM skipped: no samples");
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(output_dir)?;

    let items: Vec<_> = (0..count).filter_map(|i| dataset.get(i)).collect();
    let batcher = MalariaBatcher::<B::InnerBackend>::eval(image_size);
    let batch = batcher.batch(items, device);

    let pixels: Vec<f32> = batch
        .images
        .clone()
        .into_data()
        .to_vec()
        .map_err(|e| MalariaError::Visualization(format!("{:?}", e)))?;

    let cam = GradCam::new(model.clone(), device.clone());
    let activations = cam.compute(batch.images)?;

    let per_image = 3 * image_size * image_size;
    let mut written = Vec::with_capacity(activations.len());
    for (i, activation) in activations.iter().enumerate() {
        let image = denormalize(&pixels[i * per_image..(i + 1) * per_image], image_size);
        let path = output_dir.join(format!("gradcam_{}.png", i));
        overlay(&image, activation)?.save(&path)?;
        debug!("Grad-CAM {} (class {}) -> {:?}", i, activation.class_index, path);
        written.push(path);
    }

    info!("Saved {} Grad-CAM overlays to {:?}", written.len(), output_dir);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::trainer::tests::{toy_config, toy_dataset};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_jet_endpoints() {
        let cold = jet(0.0);
        let hot = jet(1.0);
        assert!(cold[2] > 0.4 && cold[0] == 0.0);
        assert!(hot[0] > 0.4 && hot[2] == 0.0);
        assert_eq!(jet(0.5)[1], 1.0);
    }

    #[test]
    fn test_denormalize_inverts_normalization() {
        let size = 2;
        let mut chw = vec![0.0f32; 3 * size * size];
        for c in 0..3 {
            for i in 0..size * size {
                chw[c * size * size + i] = (0.5 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
        let img = denormalize(&chw, size);
        assert!(img.pixels().all(|p| p.0.iter().all(|&v| (v as i32 - 128).abs() <= 1)));
    }

    #[test]
    fn test_overlay_matches_image_size() {
        let image = RgbImage::from_pixel(16, 16, Rgb([100, 100, 100]));
        let activation = ClassActivation {
            class_index: 0,
            heatmap: vec![0.0, 1.0, 0.5, 0.25],
            height: 2,
            width: 2,
        };
        let out = overlay(&image, &activation).unwrap();
        assert_eq!(out.dimensions(), (16, 16));
        assert!(out.pixels().any(|p| p.0.contains(&255)));
    }

    #[test]
    fn test_compute_normalised_maps() {
        let config = toy_config(1);
        let device = Default::default();
        let model = config.classifier_config(2).init::<TestBackend>(&device);
        let data = toy_dataset(2);

        let items: Vec<_> = (0..3).filter_map(|i| data.get(i)).collect();
        let batch = MalariaBatcher::<NdArray>::eval(config.image_size).batch(items, &device);
        let maps = GradCam::new(model, device).compute(batch.images).unwrap();

        assert_eq!(maps.len(), 3);
        for map in &maps {
            assert_eq!(map.heatmap.len(), map.height * map.width);
            assert!(map.heatmap.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(map.class_index < 2);
        }
    }

    #[test]
    fn test_save_overlays_writes_pngs() {
        let dir = TempDir::new().unwrap();
        let config = toy_config(1);
        let device = Default::default();
        let model = config.classifier_config(2).init::<TestBackend>(&device);

        let written = save_overlays(&model, &toy_dataset(3), 4, config.image_size, dir.path(), &device).unwrap();
        assert_eq!(written.len(), 4);
        assert!(dir.path().join("gradcam_3.png").exists());

        let img = image::open(&written[0]).unwrap();
        assert_eq!(img.width() as usize, config.image_size);
    }
}
