//! Burn Dataset Integration
//!
//! Decoded images are cached once in memory (in parallel) and shared between
//! every subset taken from them, so the train/test split and the
//! cross-validation folds reuse the same pixels. Augmentation runs in the
//! batcher, on every batch.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{ImageReader, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::utils::error::{MalariaError, Result};
use crate::{IMAGENET_MEAN, IMAGENET_STD};

/// A decoded image with its label
#[derive(Clone)]
pub struct MalariaItem {
    pub image: RgbImage,
    pub label: usize,
    pub path: PathBuf,
}

impl MalariaItem {
    pub fn from_path(path: &std::path::Path, label: usize) -> Result<Self> {
        let image = ImageReader::open(path)
            .map_err(|e| MalariaError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| MalariaError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| MalariaError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .to_rgb8();

        Ok(Self {
            image,
            label,
            path: path.to_path_buf(),
        })
    }
}

impl std::fmt::Debug for MalariaItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MalariaItem")
            .field("label", &self.label)
            .field("path", &self.path)
            .field("image_size", &format!("{}x{}", self.image.width(), self.image.height()))
            .finish()
    }
}

/// In-memory dataset; a view of `indices` over a shared item cache
#[derive(Clone)]
pub struct MalariaBurnDataset {
    items: Arc<Vec<MalariaItem>>,
    indices: Vec<usize>,
}

impl std::fmt::Debug for MalariaBurnDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MalariaBurnDataset")
            .field("len", &self.indices.len())
            .field("cached", &self.items.len())
            .finish()
    }
}

impl MalariaBurnDataset {
    /// Decode every sample in parallel
    ///
    /// Unreadable images are skipped with a warning, so positions in the
    /// returned dataset refer to successfully decoded images only.
    pub fn new_cached(samples: Vec<(PathBuf, usize)>) -> Result<Self> {
        let total = samples.len();
        info!("Pre-loading {} images into memory", total);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .map_err(|e| MalariaError::Dataset(e.to_string()))?
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);

        let items: Vec<MalariaItem> = samples
            .par_iter()
            .filter_map(|(path, label)| {
                let result = match MalariaItem::from_path(path, *label) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Skipping {}", e);
                        None
                    }
                };
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                result
            })
            .collect();

        pb.finish_and_clear();

        if items.is_empty() {
            return Err(MalariaError::Dataset("no readable images".to_string()));
        }
        if items.len() < total {
            warn!("{} of {} images could not be decoded", total - items.len(), total);
        }
        info!("Loaded {} images", items.len());

        Ok(Self::from_items(items))
    }

    pub fn from_items(items: Vec<MalariaItem>) -> Self {
        let indices = (0..items.len()).collect();
        Self {
            items: Arc::new(items),
            indices,
        }
    }

    /// View over positions of this dataset, sharing the cache
    pub fn subset(&self, positions: &[usize]) -> Self {
        Self {
            items: Arc::clone(&self.items),
            indices: positions.iter().map(|&p| self.indices[p]).collect(),
        }
    }

    pub fn labels(&self) -> Vec<usize> {
        self.indices.iter().map(|&i| self.items[i].label).collect()
    }

    pub fn path(&self, index: usize) -> Option<&std::path::Path> {
        self.indices.get(index).map(|&i| self.items[i].path.as_path())
    }

    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for label in self.labels() {
            if label < num_classes {
                counts[label] += 1;
            }
        }
        counts
    }
}

impl Dataset<MalariaItem> for MalariaBurnDataset {
    fn get(&self, index: usize) -> Option<MalariaItem> {
        self.indices.get(index).map(|&i| self.items[i].clone())
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// A batch of normalized images and their labels
#[derive(Clone, Debug)]
pub struct MalariaBatch<B: Backend> {
    /// `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Whether the batcher augments
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchMode {
    Train,
    Eval,
}

/// Batcher applying the train or eval transform and ImageNet normalization
pub struct MalariaBatcher<B: Backend> {
    augmenter: Augmenter,
    mode: BatchMode,
    seed: u64,
    /// Batches produced so far; mixed into the per-batch seed
    counter: Arc<AtomicU64>,
    _backend: PhantomData<B>,
}

impl<B: Backend> Clone for MalariaBatcher<B> {
    fn clone(&self) -> Self {
        Self {
            augmenter: self.augmenter.clone(),
            mode: self.mode,
            seed: self.seed,
            counter: Arc::clone(&self.counter),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> std::fmt::Debug for MalariaBatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MalariaBatcher")
            .field("image_size", &self.augmenter.image_size())
            .field("mode", &self.mode)
            .finish()
    }
}

impl<B: Backend> MalariaBatcher<B> {
    /// Augmenting batcher; the augmentation stream is reproducible from `seed`
    pub fn train(config: AugmentationConfig, image_size: usize, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(config, image_size as u32),
            mode: BatchMode::Train,
            seed,
            counter: Arc::new(AtomicU64::new(0)),
            _backend: PhantomData,
        }
    }

    /// Resize-only batcher
    pub fn eval(image_size: usize) -> Self {
        Self {
            augmenter: Augmenter::no_augmentation(image_size as u32),
            mode: BatchMode::Eval,
            seed: 0,
            counter: Arc::new(AtomicU64::new(0)),
            _backend: PhantomData,
        }
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    fn image_size(&self) -> usize {
        self.augmenter.image_size() as usize
    }
}

/// Stack CHW images into a normalized `[n, 3, size, size]` tensor
pub fn normalized_images<B: Backend>(data: Vec<f32>, n: usize, image_size: usize, device: &B::Device) -> Tensor<B, 4> {
    let images = Tensor::<B, 4>::from_floats(TensorData::new(data, [n, 3, image_size, image_size]), device);
    let mean = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]), device);
    let std = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]), device);

    (images - mean) / std
}

impl<B: Backend> Batcher<B, MalariaItem, MalariaBatch<B>> for MalariaBatcher<B> {
    fn batch(&self, items: Vec<MalariaItem>, device: &B::Device) -> MalariaBatch<B> {
        let batch_size = items.len();
        let image_size = self.image_size();

        let per_image: Vec<Vec<f32>> = match self.mode {
            BatchMode::Train => {
                let batch_seed = self
                    .seed
                    .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    .wrapping_add(self.counter.fetch_add(1, Ordering::Relaxed));
                items
                    .par_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let mut rng = ChaCha8Rng::seed_from_u64(batch_seed.wrapping_add(i as u64));
                        self.augmenter.preprocess(&item.image, Some(&mut rng))
                    })
                    .collect()
            }
            BatchMode::Eval => items
                .par_iter()
                .map(|item| self.augmenter.preprocess(&item.image, None))
                .collect(),
        };

        let images_data: Vec<f32> = per_image.into_iter().flatten().collect();
        let images = normalized_images::<B>(images_data, batch_size, image_size, device);

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        MalariaBatch { images, targets }
    }
}
