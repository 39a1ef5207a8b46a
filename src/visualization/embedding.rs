//! Low-dimensional embeddings of backbone features
//!
//! PCA uses power iteration with deflation on the covariance matrix. t-SNE
//! is the exact O(n²) variant, which is fine for test-set sized inputs.

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::utils::error::{MalariaError, Result};

const POWER_ITERATIONS: usize = 500;
const POWER_TOLERANCE: f64 = 1e-10;

/// Project `features` (`[n, d]`) onto its first `n_components` principal axes
///
/// The result has `min(n_components, d)` columns. Each axis is sign-fixed so
/// that its largest-magnitude loading is positive.
pub fn pca(features: &Array2<f64>, n_components: usize) -> Result<Array2<f64>> {
    let (n, d) = features.dim();
    if n < 2 {
        return Err(MalariaError::Visualization(format!("PCA needs at least 2 samples, got {}", n)));
    }
    if n_components == 0 {
        return Err(MalariaError::Visualization("PCA needs at least one component".to_string()));
    }
    let k = n_components.min(d);

    let mean = features
        .mean_axis(Axis(0))
        .ok_or_else(|| MalariaError::Visualization("empty feature matrix".to_string()))?;
    let centered = features - &mean;
    let mut cov = centered.t().dot(&centered) / (n as f64 - 1.0);

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let mut axes = Array2::<f64>::zeros((d, k));

    for c in 0..k {
        let mut v = Array1::from_shape_fn(d, |_| rng.gen::<f64>() - 0.5);
        normalize(&mut v);

        for _ in 0..POWER_ITERATIONS {
            let mut next = cov.dot(&v);
            if normalize(&mut next) == 0.0 {
                // Remaining variance is zero; any unit vector will do
                break;
            }
            let delta = (&next - &v).mapv(f64::abs).sum().min((&next + &v).mapv(f64::abs).sum());
            v = next;
            if delta < POWER_TOLERANCE {
                break;
            }
        }

        let pivot = v
            .iter()
            .copied()
            .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.mapv_inplace(|x| -x);
        }

        let eigenvalue = v.dot(&cov.dot(&v));
        debug!("PCA component {}: eigenvalue {:.4e}", c + 1, eigenvalue);

        // Deflate
        let outer = v
            .view()
            .insert_axis(Axis(1))
            .dot(&v.view().insert_axis(Axis(0)));
        cov = cov - outer * eigenvalue;

        axes.column_mut(c).assign(&v);
    }

    Ok(centered.dot(&axes))
}

/// Scale to unit length and return the original norm
fn normalize(v: &mut Array1<f64>) -> f64 {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    norm
}

/// t-SNE hyperparameters
#[derive(Debug, Clone)]
pub struct TsneConfig {
    pub n_components: usize,
    pub perplexity: f64,
    pub n_iter: usize,
    pub early_exaggeration: f64,
    /// Iterations run with exaggerated P and momentum 0.5
    pub exaggeration_iters: usize,
    pub seed: u64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            perplexity: 30.0,
            n_iter: 1000,
            early_exaggeration: 12.0,
            exaggeration_iters: 250,
            seed: crate::DEFAULT_SEED,
        }
    }
}

impl TsneConfig {
    pub fn with_perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    /// Learning rate heuristic `max(n / exaggeration / 4, 50)`
    pub fn learning_rate(&self, n: usize) -> f64 {
        (n as f64 / self.early_exaggeration / 4.0).max(50.0)
    }
}

fn squared_distances(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let mut d = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let diff = &x.row(i) - &x.row(j);
            let v = diff.dot(&diff);
            d[[i, j]] = v;
            d[[j, i]] = v;
        }
    }
    d
}

/// Conditional probabilities P(j|i) whose entropy matches `ln(perplexity)`
fn conditional_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = distances.nrows();
    let target = perplexity.ln();
    let mut p = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        let mut beta = 1.0;
        let mut beta_min = f64::NEG_INFINITY;
        let mut beta_max = f64::INFINITY;
        let mut row = vec![0.0; n];

        for _ in 0..100 {
            let mut sum = 0.0;
            for j in 0..n {
                row[j] = if j == i { 0.0 } else { (-distances[[i, j]] * beta).exp() };
                sum += row[j];
            }
            if sum == 0.0 {
                sum = 1e-8;
            }

            let mut weighted = 0.0;
            for j in 0..n {
                row[j] /= sum;
                weighted += distances[[i, j]] * row[j];
            }
            let entropy = sum.ln() + beta * weighted;
            let diff = entropy - target;
            if diff.abs() <= 1e-5 {
                break;
            }

            if diff > 0.0 {
                beta_min = beta;
                beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
            } else {
                beta_max = beta;
                beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
            }
        }

        for j in 0..n {
            p[[i, j]] = row[j];
        }
    }
    p
}

/// Exact t-SNE embedding of `features` (`[n, d]`) into `[n, n_components]`
pub fn tsne(features: &Array2<f64>, config: &TsneConfig) -> Result<Array2<f64>> {
    let n = features.nrows();
    if n < 2 {
        return Err(MalariaError::Visualization(format!("t-SNE needs at least 2 samples, got {}", n)));
    }
    if !(config.perplexity > 0.0) || config.perplexity >= n as f64 {
        return Err(MalariaError::Visualization(format!(
            "perplexity {} must be in (0, {})",
            config.perplexity, n
        )));
    }
    let dims = config.n_components.max(1);

    let conditional = conditional_probabilities(&squared_distances(features), config.perplexity);
    let p = (&conditional + &conditional.t()) / (2.0 * n as f64);
    let p = p.mapv(|v| v.max(1e-12));

    let mut y = initial_embedding(features, dims, config.seed)?;
    let mut update = Array2::<f64>::zeros((n, dims));
    let mut gains = Array2::<f64>::ones((n, dims));
    let learning_rate = config.learning_rate(n);

    for iter in 0..config.n_iter {
        let exploring = iter < config.exaggeration_iters;
        let exaggeration = if exploring { config.early_exaggeration } else { 1.0 };
        let momentum = if exploring { 0.5 } else { 0.8 };

        // Student-t kernel
        let mut num = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let diff = &y.row(i) - &y.row(j);
                let v = 1.0 / (1.0 + diff.dot(&diff));
                num[[i, j]] = v;
                num[[j, i]] = v;
            }
        }
        let total = num.sum().max(1e-12);

        let mut grad = Array2::<f64>::zeros((n, dims));
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = (num[[i, j]] / total).max(1e-12);
                let coeff = 4.0 * (exaggeration * p[[i, j]] - q) * num[[i, j]];
                for c in 0..dims {
                    grad[[i, c]] += coeff * (y[[i, c]] - y[[j, c]]);
                }
            }
        }

        for ((g, u), gain) in grad.iter().zip(update.iter_mut()).zip(gains.iter_mut()) {
            *gain = if *u * *g < 0.0 { *gain + 0.2 } else { *gain * 0.8 };
            *gain = gain.max(0.01);
            *u = momentum * *u - learning_rate * *gain * *g;
        }
        y += &update;

        if (iter + 1) % 250 == 0 {
            debug!("t-SNE iteration {}/{}", iter + 1, config.n_iter);
        }
    }

    Ok(y)
}

/// PCA initialisation scaled so the first axis has std 1e-4
fn initial_embedding(features: &Array2<f64>, dims: usize, seed: u64) -> Result<Array2<f64>> {
    let n = features.nrows();
    let projected = pca(features, dims)?;

    let mut y = Array2::<f64>::zeros((n, dims));
    for c in 0..projected.ncols() {
        y.column_mut(c).assign(&projected.column(c));
    }

    let std = y.column(0).std(0.0);
    if std > 0.0 {
        y.mapv_inplace(|v| v / std * 1e-4);
    }

    // Columns PCA could not fill, or a degenerate projection, start from noise
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for c in 0..dims {
        if c >= projected.ncols() || std == 0.0 {
            for i in 0..n {
                y[[i, c]] = (rng.gen::<f64>() - 0.5) * 1e-4;
            }
        }
    }
    Ok(y)
}

/// Convert an `[n, d]` row-major buffer into an ndarray matrix
pub fn to_matrix(data: Vec<f64>, n: usize, d: usize) -> Result<Array2<f64>> {
    Array2::from_shape_vec((n, d), data).map_err(|e| MalariaError::Visualization(e.to_string()))
}
