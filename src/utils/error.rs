//! Error Handling Module
//!
//! Defines the error type shared by the library. Binaries wrap it in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for malaria detection operations
#[derive(Error, Debug)]
pub enum MalariaError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset indexing or splitting
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or checkpoints
    #[error("Model error: {0}")]
    Model(String),

    /// Error during training
    #[error("Training error: {0}")]
    Training(String),

    /// Error during inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error writing an export artifact
    #[error("Export error: {0}")]
    Export(String),

    /// Error producing a plot or overlay
    #[error("Visualization error: {0}")]
    Visualization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image codec error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for malaria detection operations
pub type Result<T> = std::result::Result<T, MalariaError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| MalariaError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| MalariaError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| MalariaError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| MalariaError::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MalariaError::Dataset("no class directories".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no class directories");
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/data/Parasitized/cell_1.png");
        let err = MalariaError::ImageLoad(path, "truncated file".to_string());
        assert!(format!("{}", err).contains("cell_1.png"));
    }

    #[test]
    fn test_serde_error_converts() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: MalariaError = parsed.unwrap_err().into();
        assert!(matches!(err, MalariaError::Serialization(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let err = result.context("Failed to read checkpoint").unwrap_err();
        assert!(format!("{}", err).contains("Failed to read checkpoint"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        assert!(opt.context("Value was None").is_err());
    }
}
