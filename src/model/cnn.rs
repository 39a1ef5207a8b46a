//! CNN Model Architecture for Blood-Smear Classification
//!
//! The network is split into a convolutional backbone and a small
//! classification head. Keeping them apart lets the backbone be initialised
//! from a previously trained record (transfer learning) and lets Grad-CAM
//! differentiate the head with respect to the last feature map.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};

use crate::utils::error::MalariaError;

/// Configuration for the MalariaClassifier CNN model
#[derive(Config, Debug)]
pub struct MalariaClassifierConfig {
    /// Number of output classes
    #[config(default = "2")]
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Dropout applied before the final linear layer
    #[config(default = "0.3")]
    pub dropout: f64,

    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters of the first block; later blocks use 2x, 4x, 8x, 8x
    #[config(default = "32")]
    pub base_filters: usize,
}

impl MalariaClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MalariaClassifier<B> {
        MalariaClassifier::new(self, device)
    }

    /// Channels of the last feature map
    pub fn feature_channels(&self) -> usize {
        self.base_filters * 8
    }

    /// Side length of the last feature map
    pub fn feature_size(&self) -> usize {
        self.input_size / 32
    }
}

/// Conv2d + BatchNorm + ReLU + optional MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, with_pool: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Five conv blocks, each halving the resolution (224 -> 7)
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,
    pub block5: ConvBlock<B>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(config: &MalariaClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        Self {
            block1: ConvBlock::new(config.in_channels, base, 3, true, device),
            block2: ConvBlock::new(base, base * 2, 3, true, device),
            block3: ConvBlock::new(base * 2, base * 4, 3, true, device),
            block4: ConvBlock::new(base * 4, base * 8, 3, true, device),
            block5: ConvBlock::new(base * 8, base * 8, 3, true, device),
        }
    }

    pub fn blocks(&self) -> [&ConvBlock<B>; 5] {
        [&self.block1, &self.block2, &self.block3, &self.block4, &self.block5]
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        let x = self.block4.forward(x);
        self.block5.forward(x)
    }
}

/// Global average pool, dropout and a linear classifier
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(config: &MalariaClassifierConfig, device: &B::Device) -> Self {
        Self {
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(config.dropout).init(),
            fc: LinearConfig::new(config.feature_channels(), config.num_classes).init(device),
        }
    }

    /// `[B, C, H, W]` -> `[B, C]`
    pub fn pool(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.global_pool.forward(features);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool(features);
        let x = self.dropout.forward(x);
        self.fc.forward(x)
    }
}

/// Blood-smear cell classifier (parasitized / uninfected)
#[derive(Module, Debug)]
pub struct MalariaClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
    num_classes: usize,
}

impl<B: Backend> MalariaClassifier<B> {
    pub fn new(config: &MalariaClassifierConfig, device: &B::Device) -> Self {
        Self {
            backbone: Backbone::new(config, device),
            head: ClassifierHead::new(config, device),
            num_classes: config.num_classes,
        }
    }

    /// Last convolutional feature map `[B, C, H/32, W/32]`
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.backbone.forward(x)
    }

    /// Logits from a feature map
    pub fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(features)
    }

    /// Logits `[B, num_classes]` from normalized images `[B, 3, H, W]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head(self.features(x))
    }

    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(x), 1)
    }

    /// Pooled backbone features `[B, C]` used for PCA / t-SNE plots
    pub fn embed(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.pool(self.features(x))
    }

    /// Replace the backbone weights with those of a saved classifier checkpoint
    ///
    /// `path` is a `CompactRecorder` checkpoint (without extension) written by
    /// a previous run. Its head is ignored, so the class count may differ.
    pub fn load_backbone(self, path: &Path, device: &B::Device) -> crate::utils::error::Result<Self> {
        let donor_config = MalariaClassifierConfig::new().with_base_filters(self.base_filters());
        let donor = MalariaClassifier::<B>::new(&donor_config, device)
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| MalariaError::Model(format!("Failed to load backbone from {:?}: {}", path, e)))?;

        Ok(Self {
            backbone: donor.backbone,
            head: self.head,
            num_classes: self.num_classes,
        })
    }

    /// Exclude backbone parameters from gradient computation
    pub fn freeze_backbone(self) -> Self {
        Self {
            backbone: self.backbone.no_grad(),
            head: self.head,
            num_classes: self.num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Trainable parameters only
    ///
    /// `num_params` also counts the batch-norm running mean and variance,
    /// one value per channel each.
    pub fn parameter_count(&self) -> usize {
        let running_stats: usize = self
            .backbone
            .blocks()
            .iter()
            .map(|block| 2 * block.bn.gamma.dims()[0])
            .sum();
        self.num_params() - running_stats
    }

    fn base_filters(&self) -> usize {
        self.backbone.block1.bn.gamma.dims()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::AutodiffModule;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> MalariaClassifierConfig {
        MalariaClassifierConfig::new().with_input_size(32).with_base_filters(4)
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(model.features(x.clone()).dims(), [2, 32, 1, 1]);
        assert_eq!(model.embed(x.clone()).dims(), [2, 32]);
        assert_eq!(model.forward(x).dims(), [2, 2]);
        assert_eq!(config.feature_channels(), 32);
        assert_eq!(config.feature_size(), 1);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 4>::random([3, 3, 64, 64], Distribution::Default, &device);

        let probs: Vec<f32> = model.forward_softmax(x).into_data().to_vec().unwrap();
        for row in probs.chunks(2) {
            assert!((row[0] + row[1] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_parameter_count() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device);

        // conv: k*k*in*out + out; bn: gamma + beta; head: 32 * 2 + 2
        let block = |i: usize, o: usize| 9 * i * o + o + 2 * o;
        let expected = block(3, 4) + block(4, 8) + block(8, 16) + block(16, 32) + block(32, 32) + 32 * 2 + 2;
        assert_eq!(model.parameter_count(), expected);

        // running mean + running var for 4 + 8 + 16 + 32 + 32 channels
        assert_eq!(model.num_params() - model.parameter_count(), 2 * (4 + 8 + 16 + 32 + 32));
    }

    #[test]
    fn test_load_backbone_from_checkpoint() {
        let device = Default::default();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("donor");

        let donor = small_config().init::<TestBackend>(&device);
        donor.clone().save_file(path.clone(), &CompactRecorder::new()).unwrap();

        let fresh = small_config().init::<TestBackend>(&device);
        let loaded = fresh.load_backbone(&path, &device).unwrap();

        let a: Vec<f32> = donor.backbone.block1.conv.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.backbone.block1.conv.weight.val().into_data().to_vec().unwrap();
        // CompactRecorder stores half precision
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-2));
    }

    #[test]
    fn test_load_backbone_missing_file() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device);
        let result = model.load_backbone(Path::new("/nonexistent/checkpoint"), &device);
        assert!(matches!(result, Err(MalariaError::Model(_))));
    }

    #[test]
    fn test_frozen_backbone_gets_no_gradients() {
        type AD = burn::backend::Autodiff<TestBackend>;
        let device = Default::default();
        let model = small_config().init::<AD>(&device).freeze_backbone();

        let x = Tensor::<AD, 4>::random([2, 3, 32, 32], Distribution::Default, &device);
        let grads = model.forward(x).sum().backward();

        assert!(model.backbone.block1.conv.weight.grad(&grads).is_none());
        assert!(model.head.fc.weight.grad(&grads).is_some());
        // The inference copy still works
        let _ = model.valid();
    }
}
