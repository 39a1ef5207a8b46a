//! Image-folder dataset loader
//!
//! Indexes a directory where every immediate subdirectory is a class:
//!
//! ```text
//! data/train/
//! ├── Parasitized/
//! │   ├── C33P1thinF_IMG_20150619_114756a_cell_179.png
//! │   └── ...
//! └── Uninfected/
//!     └── ...
//! ```
//!
//! Class names are sorted alphabetically, so `Parasitized = 0` and
//! `Uninfected = 1` for the canonical malaria cell dataset.

use std::path::{Path, PathBuf};

use image::ImageReader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{MalariaError, Result};

/// Extensions accepted as images (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single indexed image file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSample {
    pub path: PathBuf,
    /// Class index into `MalariaDataset::class_names`
    pub label: usize,
}

/// Indexed image-folder dataset; images are decoded lazily
#[derive(Debug, Clone)]
pub struct MalariaDataset {
    pub root_dir: PathBuf,
    pub samples: Vec<ImageSample>,
    pub class_names: Vec<String>,
}

impl MalariaDataset {
    /// Index `root_dir`
    ///
    /// Each immediate subdirectory is a class; image files anywhere below it
    /// belong to that class.
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Indexing dataset at {:?}", root_dir);

        if !root_dir.exists() {
            return Err(MalariaError::PathNotFound(root_dir));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(MalariaError::Dataset(format!(
                "no class directories found in {:?}",
                root_dir
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut paths: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.is_file() && is_image_file(p))
                .collect();
            // Directory order is filesystem dependent
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        info!("Found {} images in {} classes", samples.len(), class_names.len());

        Ok(Self {
            root_dir,
            samples,
            class_names,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Label of every sample, in index order
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// `(path, label)` pairs, in index order
    pub fn path_labels(&self) -> Vec<(PathBuf, usize)> {
        self.samples.iter().map(|s| (s.path.clone(), s.label)).collect()
    }

    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        let total = self.samples.len();
        let class_ratios = class_counts
            .iter()
            .map(|&c| if total == 0 { 0.0 } else { c as f64 / total as f64 })
            .collect();

        DatasetStats {
            total_samples: total,
            class_names: self.class_names.clone(),
            class_counts,
            class_ratios,
        }
    }

    /// Open the first `n` images and record their class and dimensions
    ///
    /// Unreadable files are reported with `dimensions: None` instead of
    /// failing the whole run.
    pub fn diagnostics(&self, n: usize) -> Vec<SampleDiagnostic> {
        self.samples
            .iter()
            .take(n)
            .enumerate()
            .map(|(index, sample)| {
                let dimensions = match ImageReader::open(&sample.path)
                    .map_err(|e| e.to_string())
                    .and_then(|r| r.into_dimensions().map_err(|e| e.to_string()))
                {
                    Ok(dims) => Some(dims),
                    Err(e) => {
                        warn!("Cannot read {:?}: {}", sample.path, e);
                        None
                    }
                };

                SampleDiagnostic {
                    index,
                    class_name: self.class_names[sample.label].clone(),
                    dimensions,
                }
            })
            .collect()
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Class distribution of a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
    pub class_ratios: Vec<f64>,
}

impl DatasetStats {
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Total samples: {}", crate::utils::format_number(self.total_samples));
        println!("  Classes: {:?}", self.class_names);
        println!("\n  Samples per class:");

        for (idx, name) in self.class_names.iter().enumerate() {
            let count = self.class_counts[idx];
            let ratio = self.class_ratios[idx];
            let bar: String = "█".repeat((ratio * 40.0) as usize);
            println!("    {:2}. {:20} {:6} ({:5.1}%) {}", idx, name, count, ratio * 100.0, bar);
        }
    }
}

/// Class and size of one inspected image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDiagnostic {
    pub index: usize,
    pub class_name: String,
    /// `(width, height)`, `None` if the header could not be read
    pub dimensions: Option<(u32, u32)>,
}
