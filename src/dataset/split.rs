//! Stratified dataset splits
//!
//! Splits operate on label vectors and return index partitions, so the same
//! routine serves the train/test split and k-fold cross-validation. Classes
//! are visited in label order and every shuffle draws from one seeded
//! `ChaCha8Rng`, which makes each split reproducible for a given seed.

use std::collections::BTreeMap;
use std::path::Path;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{MalariaError, Result};

/// Requested size of the test partition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TestSize {
    /// Fraction of all samples, rounded up
    Fraction(f64),
    /// Absolute number of samples
    Count(usize),
}

impl TestSize {
    fn resolve(self, n: usize) -> Result<usize> {
        let count = match self {
            TestSize::Fraction(f) => {
                if !(f > 0.0 && f < 1.0) {
                    return Err(MalariaError::Config(format!(
                        "test fraction must be in (0, 1), got {}",
                        f
                    )));
                }
                (f * n as f64).ceil() as usize
            }
            TestSize::Count(c) => c,
        };

        if count == 0 || count >= n {
            return Err(MalariaError::Dataset(format!(
                "test size {} is invalid for {} samples",
                count, n
            )));
        }
        Ok(count)
    }
}

/// A train/test index partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub seed: u64,
}

impl SplitIndices {
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn stats(&self, labels: &[usize]) -> SplitStats {
        let count = |idx: &[usize]| {
            let mut per_class: BTreeMap<usize, usize> = BTreeMap::new();
            for &i in idx {
                *per_class.entry(labels[i]).or_default() += 1;
            }
            per_class.into_values().collect()
        };

        SplitStats {
            total: self.train.len() + self.test.len(),
            train_per_class: count(&self.train),
            test_per_class: count(&self.test),
        }
    }
}

/// Per-class counts of a split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitStats {
    pub total: usize,
    pub train_per_class: Vec<usize>,
    pub test_per_class: Vec<usize>,
}

impl std::fmt::Display for SplitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let train: usize = self.train_per_class.iter().sum();
        let test: usize = self.test_per_class.iter().sum();
        let pct = |n: usize| 100.0 * n as f64 / self.total.max(1) as f64;

        writeln!(f, "Dataset Split Statistics:")?;
        writeln!(f, "  Total images: {}", self.total)?;
        writeln!(f, "  Train: {} ({:.1}%) per class {:?}", train, pct(train), self.train_per_class)?;
        write!(f, "  Test:  {} ({:.1}%) per class {:?}", test, pct(test), self.test_per_class)
    }
}

fn group_by_class(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }
    by_class
}

/// Number of test samples drawn from each class
///
/// Proportional to class size, at least one per class and at most
/// `size - 1` so every class keeps a training sample. Rounding leftovers go
/// to the classes with the largest fractional remainders.
fn allocate_test_counts(class_sizes: &[usize], test_n: usize) -> Result<Vec<usize>> {
    let n: usize = class_sizes.iter().sum();
    let k = class_sizes.len();

    if test_n < k || n - test_n < k {
        return Err(MalariaError::Dataset(format!(
            "test size {} cannot hold every one of {} classes in both partitions",
            test_n, k
        )));
    }

    let exact: Vec<f64> = class_sizes
        .iter()
        .map(|&s| test_n as f64 * s as f64 / n as f64)
        .collect();
    let mut alloc: Vec<usize> = exact
        .iter()
        .zip(class_sizes)
        .map(|(&e, &s)| (e.floor() as usize).clamp(1, s - 1))
        .collect();

    loop {
        let total: usize = alloc.iter().sum();
        if total == test_n {
            break;
        }

        let residual = |c: usize| exact[c] - alloc[c] as f64;
        let pick = if total < test_n {
            (0..k)
                .filter(|&c| alloc[c] < class_sizes[c] - 1)
                .max_by(|&a, &b| residual(a).total_cmp(&residual(b)).then(b.cmp(&a)))
        } else {
            (0..k)
                .filter(|&c| alloc[c] > 1)
                .min_by(|&a, &b| residual(a).total_cmp(&residual(b)).then(a.cmp(&b)))
        };

        match pick {
            Some(c) if total < test_n => alloc[c] += 1,
            Some(c) => alloc[c] -= 1,
            None => {
                return Err(MalariaError::Dataset(format!(
                    "cannot allocate {} test samples across classes {:?}",
                    test_n, class_sizes
                )))
            }
        }
    }

    Ok(alloc)
}

/// Stratified train/test split over `labels`
pub fn stratified_train_test_split(labels: &[usize], test_size: TestSize, seed: u64) -> Result<SplitIndices> {
    let n = labels.len();
    if n < 2 {
        return Err(MalariaError::Dataset(format!("cannot split {} samples", n)));
    }
    let test_n = test_size.resolve(n)?;

    let mut by_class = group_by_class(labels);
    if let Some((label, members)) = by_class.iter().find(|(_, m)| m.len() < 2) {
        return Err(MalariaError::Dataset(format!(
            "class {} has {} member(s); stratified split needs at least 2",
            label,
            members.len()
        )));
    }

    let sizes: Vec<usize> = by_class.values().map(Vec::len).collect();
    let alloc = allocate_test_counts(&sizes, test_n)?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - test_n);
    let mut test = Vec::with_capacity(test_n);

    for (members, &n_test) in by_class.values_mut().zip(&alloc) {
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    // Interleave the classes
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok(SplitIndices { train, test, seed })
}

/// Stratified k-fold partition; returns `(train_idx, val_idx)` per fold
pub fn stratified_k_fold(labels: &[usize], k: usize, seed: u64) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if k < 2 {
        return Err(MalariaError::Config(format!("k-fold needs k >= 2, got {}", k)));
    }

    let mut by_class = group_by_class(labels);
    if let Some((label, members)) = by_class.iter().find(|(_, m)| m.len() < k) {
        return Err(MalariaError::Dataset(format!(
            "class {} has {} member(s), fewer than {} folds",
            label,
            members.len(),
            k
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut next = 0usize;

    for members in by_class.values_mut() {
        members.shuffle(&mut rng);
        for &idx in members.iter() {
            folds[next % k].push(idx);
            next += 1;
        }
    }

    Ok((0..k)
        .map(|f| {
            let mut val = folds[f].clone();
            val.sort_unstable();
            let mut train: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(g, _)| *g != f)
                .flat_map(|(_, fold)| fold.iter().copied())
                .collect();
            train.sort_unstable();
            (train, val)
        })
        .collect())
}
