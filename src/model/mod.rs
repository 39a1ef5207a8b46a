//! Model module
//!
//! A compact convolutional classifier built with Burn:
//! - `Backbone`: five conv/BN/ReLU/max-pool blocks
//! - `ClassifierHead`: global average pooling, dropout and a linear layer
//!
//! The split is what makes backbone transfer, freezing and Grad-CAM possible.

pub mod cnn;

pub use cnn::{Backbone, ClassifierHead, ConvBlock, MalariaClassifier, MalariaClassifierConfig};
