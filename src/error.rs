//! Error types for maskflow

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Bounds error: {0}")]
    Bounds(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl SegmentationError {
    /// Whether the error was raised synchronously at submission time.
    /// Such errors are surfaced to the submitting path and never reach
    /// the scheduler.
    pub fn is_submission_error(&self) -> bool {
        matches!(self, SegmentationError::Input(_) | SegmentationError::Bounds(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SegmentationError::Input("empty annotation set".to_string());
        assert!(err.to_string().contains("Input error"));
        assert!(err.to_string().contains("empty annotation set"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SegmentationError = io_err.into();
        match err {
            SegmentationError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_submission_error_classification() {
        assert!(SegmentationError::Input("x".to_string()).is_submission_error());
        assert!(SegmentationError::Bounds("x".to_string()).is_submission_error());
        assert!(!SegmentationError::Model("x".to_string()).is_submission_error());
        assert!(!SegmentationError::Device("x".to_string()).is_submission_error());
    }
}
