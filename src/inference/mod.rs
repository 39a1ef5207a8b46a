//! Inference module for single-image prediction and latency benchmarking
//!
//! The [`Predictor`] loads an exported bundle and applies exactly the
//! evaluation preprocessing used during training.

pub mod predictor;

pub use predictor::{BenchmarkResult, Prediction, Predictor};

/// Default number of benchmark iterations
pub const BENCHMARK_ITERATIONS: usize = 20;
