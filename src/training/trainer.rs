//! Training loop for the MalariaClassifier
//!
//! - Forward/backward passes with automatic differentiation
//! - Cross-entropy loss and the AdamW optimizer
//! - Evaluation on the inner (non-autodiff) backend
//! - Checkpointing of the best epoch and early stopping

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{adaptor::OptimizerAdaptor, AdamW, AdamWConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dataset::{MalariaBatcher, MalariaBurnDataset, MalariaItem};
use crate::evaluation::metrics::Predictions;
use crate::model::cnn::MalariaClassifier;
use crate::training::early_stopping::{EarlyStopping, StopDecision};
use crate::utils::error::{MalariaError, Result};
use crate::utils::logging::TrainingLogger;

/// Per-epoch record of a training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub train_accuracies: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub val_accuracies: Vec<f64>,
    /// Epoch (0-indexed) of the checkpointed model; `None` if no epoch improved
    pub best_epoch: Option<usize>,
    pub best_val_accuracy: f64,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.train_losses.len()
    }
}

/// Loss and accuracy of one pass over a dataset
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
}

/// Result of evaluating a model on a dataset
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub predictions: Predictions,
}

/// Fetch `indices` from the dataset as one item vector
fn collect_items(dataset: &MalariaBurnDataset, indices: &[usize]) -> Vec<MalariaItem> {
    indices.iter().filter_map(|&i| dataset.get(i)).collect()
}

/// Run `model` over `dataset` in order and collect softmax outputs
///
/// Works with any backend; the trainer calls it with the inner model.
pub fn evaluate_model<B: Backend>(
    model: &MalariaClassifier<B>,
    dataset: &MalariaBurnDataset,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    let batcher = MalariaBatcher::<B>::eval(image_size);
    let loss_fn: CrossEntropyLoss<B> = CrossEntropyLossConfig::new().init(device);
    let num_classes = model.num_classes();

    let len = dataset.len();
    let mut predictions = Predictions::new(num_classes);
    let mut weighted_loss = 0.0;

    let indices: Vec<usize> = (0..len).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items = collect_items(dataset, chunk);
        if items.is_empty() {
            continue;
        }
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let n = labels.len();

        let batch = batcher.batch(items, device);
        let logits = model.forward(batch.images);

        let loss: f64 = loss_fn.forward(logits.clone(), batch.targets).into_scalar().elem();
        weighted_loss += loss * n as f64;

        let probs: Vec<f32> = burn::tensor::activation::softmax(logits, 1)
            .into_data()
            .to_vec()
            .map_err(|e| MalariaError::Inference(format!("{:?}", e)))?;
        predictions.extend(&labels, &probs);
    }

    let total = predictions.len();
    let loss = if total > 0 { weighted_loss / total as f64 } else { 0.0 };
    let accuracy = predictions.accuracy();

    debug!("Evaluation: loss = {:.4}, accuracy = {:.2}%, samples = {}", loss, accuracy * 100.0, total);

    Ok(Evaluation {
        loss,
        accuracy,
        predictions,
    })
}

/// Trainer owning the model and its AdamW optimizer
pub struct Trainer<B: AutodiffBackend> {
    pub model: MalariaClassifier<B>,
    optimizer: OptimizerAdaptor<AdamW, MalariaClassifier<B>, B>,
    loss_fn: CrossEntropyLoss<B>,
    batcher: MalariaBatcher<B>,
    config: PipelineConfig,
    device: B::Device,
    rng: ChaCha8Rng,
    /// Prefix for log lines ("train", "fold 2", ...)
    label: String,
    /// Model as it was after the last epoch, before restoring the best one
    final_model: Option<MalariaClassifier<B>>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(model: MalariaClassifier<B>, config: &PipelineConfig, device: B::Device, label: &str) -> Self {
        let optimizer = AdamWConfig::new()
            .with_weight_decay(config.weight_decay as f32)
            .init();

        Self {
            model,
            optimizer,
            loss_fn: CrossEntropyLossConfig::new().init(&device),
            batcher: MalariaBatcher::train(config.augmentation.clone(), config.image_size, config.seed),
            config: config.clone(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            device,
            label: label.to_string(),
            final_model: None,
        }
    }

    /// One pass over a freshly shuffled training set
    ///
    /// Loss and accuracy are weighted by the number of samples per batch.
    pub fn train_epoch(&mut self, dataset: &MalariaBurnDataset) -> Result<EpochStats> {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(&mut self.rng);

        let batch_size = self.config.batch_size.max(1);
        let num_batches = indices.len().div_ceil(batch_size);

        let mut weighted_loss = 0.0;
        let mut correct = 0usize;
        let mut total = 0usize;

        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let items = collect_items(dataset, chunk);
            if items.is_empty() {
                continue;
            }
            let batch = self.batcher.batch(items, &self.device);
            let n = batch.targets.dims()[0];

            let output = self.model.forward(batch.images);
            let loss = self.loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(MalariaError::Training(format!(
                    "[{}] loss became {} at batch {}",
                    self.label,
                    loss_value,
                    batch_idx + 1
                )));
            }
            weighted_loss += loss_value * n as f64;

            let [batch_n, _] = output.dims();
            let batch_correct: i64 = output
                .argmax(1)
                .reshape([batch_n])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();
            correct += batch_correct as usize;
            total += n;

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optimizer.step(self.config.learning_rate, self.model.clone(), grads);

            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "[{}] batch {}/{}: loss = {:.4}, acc = {:.2}%",
                    self.label,
                    batch_idx + 1,
                    num_batches,
                    loss_value,
                    100.0 * correct as f64 / total as f64
                );
            }
        }

        if total == 0 {
            return Err(MalariaError::Training("training set is empty".to_string()));
        }

        Ok(EpochStats {
            loss: weighted_loss / total as f64,
            accuracy: correct as f64 / total as f64,
        })
    }

    /// Evaluate the current model (inference mode, no augmentation)
    pub fn evaluate(&self, dataset: &MalariaBurnDataset) -> Result<Evaluation> {
        evaluate_model(
            &self.model.valid(),
            dataset,
            self.config.batch_size,
            self.config.image_size,
            &self.device,
        )
    }

    /// Train with early stopping on validation accuracy
    ///
    /// The best epoch is checkpointed to `checkpoint_path` and restored when
    /// training ends. When no epoch improves, the final model is written so
    /// that a checkpoint always exists.
    pub fn fit(
        &mut self,
        train: &MalariaBurnDataset,
        val: &MalariaBurnDataset,
        checkpoint_path: &Path,
    ) -> Result<TrainingHistory> {
        info!(
            "[{}] training on {} samples, validating on {}",
            self.label,
            train.len(),
            val.len()
        );

        let mut history = TrainingHistory::default();
        let mut stopper = EarlyStopping::new(self.config.patience, self.config.min_delta);
        let mut logger = TrainingLogger::new(&self.label, self.config.epochs);

        for epoch in 0..self.config.epochs {
            logger.start_epoch(epoch);

            let stats = self.train_epoch(train)?;
            let eval = self.evaluate(val)?;

            history.train_losses.push(stats.loss);
            history.train_accuracies.push(stats.accuracy);
            history.val_losses.push(eval.loss);
            history.val_accuracies.push(eval.accuracy);
            logger.end_epoch(stats.loss, stats.accuracy, eval.loss, eval.accuracy);

            match stopper.update(eval.accuracy) {
                StopDecision::Improved => {
                    self.save_checkpoint(checkpoint_path)?;
                    history.best_epoch = Some(epoch);
                    history.best_val_accuracy = eval.accuracy;
                    logger.checkpoint_saved(eval.accuracy, checkpoint_path);
                }
                StopDecision::NoImprovement => {}
                StopDecision::Stop => {
                    logger.early_stop(history.best_epoch, stopper.patience());
                    history.stopped_early = true;
                    break;
                }
            }
        }

        logger.complete(history.epochs_run(), history.best_epoch, history.best_val_accuracy);
        self.restore_best(&history, checkpoint_path)?;

        Ok(history)
    }

    /// Keep the final-epoch model, then leave the best checkpoint loaded
    fn restore_best(&mut self, history: &TrainingHistory, checkpoint_path: &Path) -> Result<()> {
        self.final_model = Some(self.model.clone());

        if history.best_epoch.is_some() {
            self.load_checkpoint(checkpoint_path)
        } else {
            self.save_checkpoint(checkpoint_path)
        }
    }

    /// Model after the last trained epoch, if `fit` has run
    pub fn final_epoch_model(&self) -> Option<&MalariaClassifier<B>> {
        self.final_model.as_ref()
    }

    /// Save the model (CompactRecorder adds the `.mpk` extension)
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.model
            .clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())
            .map_err(|e| MalariaError::Model(format!("Failed to save checkpoint {:?}: {:?}", path, e)))?;
        debug!("[{}] checkpoint saved to {:?}", self.label, path);
        Ok(())
    }

    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        self.model = self
            .model
            .clone()
            .load_file(path.to_path_buf(), &CompactRecorder::new(), &self.device)
            .map_err(|e| MalariaError::Model(format!("Failed to load checkpoint {:?}: {:?}", path, e)))?;
        Ok(())
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// Path of the file a CompactRecorder checkpoint is written to
pub fn checkpoint_file(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Fresh classifier for `config`, optionally with a transferred and frozen backbone
pub fn build_model<B: Backend>(
    config: &PipelineConfig,
    num_classes: usize,
    device: &B::Device,
) -> Result<MalariaClassifier<B>> {
    let mut model = config.classifier_config(num_classes).init::<B>(device);

    if let Some(path) = &config.pretrained_backbone {
        info!("Loading pretrained backbone from {:?}", path);
        model = model.load_backbone(path, device)?;
    }
    if config.freeze_backbone {
        info!("Backbone frozen; only the head is trained");
        model = model.freeze_backbone();
    }

    Ok(model)
}

/// Load a classifier checkpoint written by [`Trainer::save_checkpoint`]
pub fn load_classifier<B: Backend>(
    config: &crate::model::cnn::MalariaClassifierConfig,
    path: &Path,
    device: &B::Device,
) -> Result<MalariaClassifier<B>> {
    config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| MalariaError::Model(format!("Failed to load checkpoint {:?}: {:?}", path, e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::augmentation::AugmentationConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    /// Two trivially separable classes: dark red vs. bright green cells
    pub(crate) fn toy_dataset(per_class: usize) -> MalariaBurnDataset {
        let items = (0..per_class * 2)
            .map(|i| {
                let label = i % 2;
                let pixel = if label == 0 { Rgb([200, 20, 20]) } else { Rgb([20, 200, 20]) };
                MalariaItem {
                    image: ImageBuffer::from_pixel(16, 16, pixel),
                    label,
                    path: PathBuf::from(format!("toy_{}.png", i)),
                }
            })
            .collect();
        MalariaBurnDataset::from_items(items)
    }

    pub(crate) fn toy_config(epochs: usize) -> PipelineConfig {
        PipelineConfig {
            image_size: 32,
            batch_size: 4,
            epochs,
            learning_rate: 1e-2,
            base_filters: 4,
            augmentation: AugmentationConfig::none(),
            ..Default::default()
        }
    }

    fn toy_model(config: &PipelineConfig) -> MalariaClassifier<TestBackend> {
        config.classifier_config(2).init(&Default::default())
    }

    fn fc_weights<B: Backend>(model: &MalariaClassifier<B>) -> Vec<f32> {
        model.head.fc.weight.val().into_data().to_vec().unwrap()
    }

    /// Within the half-precision error of a CompactRecorder checkpoint
    fn close(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-2)
    }

    #[test]
    fn test_train_epoch_reports_stats() {
        let config = toy_config(1);
        let data = toy_dataset(6);
        let mut trainer = Trainer::new(toy_model(&config), &config, Default::default(), "test");

        let stats = trainer.train_epoch(&data).unwrap();
        assert!(stats.loss.is_finite() && stats.loss > 0.0);
        assert!((0.0..=1.0).contains(&stats.accuracy));
    }

    #[test]
    fn test_evaluate_collects_every_sample() {
        let config = toy_config(1);
        let data = toy_dataset(5);
        let trainer = Trainer::new(toy_model(&config), &config, Default::default(), "test");

        let eval = trainer.evaluate(&data).unwrap();
        assert_eq!(eval.predictions.len(), 10);
        assert_eq!(eval.predictions.labels, data.labels());
        for row in &eval.predictions.probabilities {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_fit_always_writes_checkpoint() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("best");
        let config = toy_config(3);
        let data = toy_dataset(4);

        let mut trainer = Trainer::new(toy_model(&config), &config, Default::default(), "test");
        let history = trainer.fit(&data, &data, &checkpoint).unwrap();

        assert!(history.epochs_run() >= 1 && history.epochs_run() <= 3);
        assert_eq!(history.val_accuracies.len(), history.epochs_run());
        assert!(checkpoint_file(&checkpoint).exists());
        assert!(trainer.final_epoch_model().is_some());

        if let Some(best) = history.best_epoch {
            assert_eq!(history.best_val_accuracy, history.val_accuracies[best]);
        }

        let saved = load_classifier::<NdArray>(&config.classifier_config(2), &checkpoint, &Default::default()).unwrap();
        assert!(close(&fc_weights(&saved), &fc_weights(&trainer.model)));
    }

    #[test]
    fn test_fit_without_improvement_saves_final_model() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("best");
        // Accuracy can never beat 0 by more than 2
        let config = PipelineConfig {
            min_delta: 2.0,
            patience: 5,
            ..toy_config(2)
        };
        let data = toy_dataset(4);

        let mut trainer = Trainer::new(toy_model(&config), &config, Default::default(), "test");
        let history = trainer.fit(&data, &data, &checkpoint).unwrap();

        assert_eq!(history.best_epoch, None);
        assert_eq!(history.epochs_run(), 2);
        assert!(!history.stopped_early);

        let final_weights = fc_weights(trainer.final_epoch_model().unwrap());
        assert_eq!(fc_weights(&trainer.model), final_weights);

        let saved = load_classifier::<NdArray>(&config.classifier_config(2), &checkpoint, &Default::default()).unwrap();
        assert!(close(&fc_weights(&saved), &final_weights));
    }

    #[test]
    fn test_restore_best_reloads_best_epoch_weights() {
        let dir = TempDir::new().unwrap();
        let checkpoint = dir.path().join("best");
        let config = PipelineConfig {
            learning_rate: 0.1,
            ..toy_config(3)
        };
        let data = toy_dataset(6);

        let mut trainer = Trainer::new(toy_model(&config), &config, Default::default(), "test");
        // Epoch 0 is the best; two more epochs move the weights away from it
        trainer.train_epoch(&data).unwrap();
        trainer.save_checkpoint(&checkpoint).unwrap();
        let best_weights = fc_weights(&trainer.model);
        trainer.train_epoch(&data).unwrap();
        trainer.train_epoch(&data).unwrap();
        let last_weights = fc_weights(&trainer.model);
        assert!(!close(&best_weights, &last_weights));

        let history = TrainingHistory {
            best_epoch: Some(0),
            ..Default::default()
        };
        trainer.restore_best(&history, &checkpoint).unwrap();

        assert!(close(&fc_weights(&trainer.model), &best_weights));
        assert_eq!(fc_weights(trainer.final_epoch_model().unwrap()), last_weights);
    }

    #[test]
    fn test_build_model_with_pretrained_backbone() {
        let dir = TempDir::new().unwrap();
        let donor_path = dir.path().join("donor");
        let config = toy_config(1);

        let donor = toy_model(&config);
        donor.clone().save_file(donor_path.clone(), &CompactRecorder::new()).unwrap();

        let config = PipelineConfig {
            pretrained_backbone: Some(donor_path),
            freeze_backbone: true,
            ..config
        };
        let model = build_model::<TestBackend>(&config, 2, &Default::default()).unwrap();

        let a: Vec<f32> = donor.backbone.block5.conv.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = model.backbone.block5.conv.weight.val().into_data().to_vec().unwrap();
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-2));

        let x = burn::tensor::Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &Default::default());
        let grads = model.forward(x).sum().backward();
        assert!(model.backbone.block5.conv.weight.grad(&grads).is_none());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ckpt");
        let config = toy_config(1);
        let device = Default::default();

        let trainer = Trainer::new(toy_model(&config), &config, device, "test");
        trainer.save_checkpoint(&path).unwrap();

        let restored = load_classifier::<NdArray>(
            &config.classifier_config(2),
            &path,
            &Default::default(),
        )
        .unwrap();

        let a: Vec<f32> = trainer.model.valid().head.fc.weight.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = restored.head.fc.weight.val().into_data().to_vec().unwrap();
        // CompactRecorder stores half precision
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-2));
    }
}
