//! Dataset handling for blood-smear cell images
//!
//! - `loader`: indexes an image-folder dataset (one subdirectory per class)
//! - `split`: stratified train/test and k-fold partitions
//! - `augmentation`: training and evaluation image transforms
//! - `burn_dataset`: in-memory Burn dataset and batcher

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod split;

pub use burn_dataset::{BatchMode, MalariaBatch, MalariaBatcher, MalariaBurnDataset, MalariaItem};
pub use loader::{DatasetStats, ImageSample, MalariaDataset};
pub use split::{stratified_k_fold, stratified_train_test_split, SplitIndices, TestSize};

/// Class names of the canonical dataset, in label order
pub const CLASS_NAMES: [&str; 2] = ["Parasitized", "Uninfected"];

/// Whether `class_names` are the canonical classes in label order
///
/// [`diagnosis_for`] reads class 0 as parasitized, which only holds for
/// this layout.
pub fn is_canonical_layout(class_names: &[String]) -> bool {
    class_names.iter().map(String::as_str).eq(CLASS_NAMES)
}

/// Diagnosis string reported for a predicted class
pub fn diagnosis_for(class_index: usize) -> &'static str {
    if class_index == 0 {
        "parasitized"
    } else {
        "uninfected"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnosis_for() {
        assert_eq!(diagnosis_for(0), "parasitized");
        assert_eq!(diagnosis_for(1), "uninfected");
    }

    #[test]
    fn test_canonical_layout() {
        let canonical: Vec<String> = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        assert!(is_canonical_layout(&canonical));

        let reversed: Vec<String> = canonical.iter().rev().cloned().collect();
        assert!(!is_canonical_layout(&reversed));
        assert!(!is_canonical_layout(&["cells".to_string(), "other".to_string()]));
    }
}
