//! Configuration for maskflow

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inference device preference for the model backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Pick an accelerator when available, otherwise CPU
    Auto,
    Cpu,
    Cuda,
}

/// Default annotation mode for batch work items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationMode {
    Point,
    Box,
    Mixed,
}

/// Batch output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory that receives mask rasters and sidecar records
    pub output_dir: PathBuf,
    /// Prefix for generated output names
    pub filename_prefix: String,
    /// Prepend the source image stem to output names
    pub use_image_name: bool,
    /// Default annotation mode for enqueued items
    pub annotation_mode: AnnotationMode,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./masks"),
            filename_prefix: "mask".to_string(),
            use_image_name: true,
            annotation_mode: AnnotationMode::Mixed,
        }
    }
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory holding model checkpoints
    pub model_path: PathBuf,
    /// Inference device preference
    pub device: DevicePreference,
    /// Ask the model for multiple ranked candidates per request
    pub multimask_output: bool,
    /// Batch processing settings
    pub batch: BatchConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let model_path = dirs::home_dir()
            .map(|mut p| {
                p.push(".maskflow");
                p.push("models");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models"));

        Self {
            model_path,
            device: DevicePreference::Auto,
            multimask_output: true,
            batch: BatchConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.batch.validate()
    }
}

impl BatchConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.filename_prefix.is_empty() {
            return Err("Batch filename prefix must not be empty".to_string());
        }

        if self.filename_prefix.len() > 64 {
            return Err("Batch filename prefix too long (max 64 characters)".to_string());
        }

        // Prefix becomes part of a file name; keep it out of other directories
        if self.filename_prefix.contains("..")
            || self.filename_prefix.contains('/')
            || self.filename_prefix.contains('\\')
        {
            return Err("Batch filename prefix contains invalid characters".to_string());
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err("Batch output directory must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.device, DevicePreference::Auto);
        assert!(config.multimask_output);
        assert_eq!(config.batch.filename_prefix, "mask");
        assert!(config.batch.use_image_name);
        assert_eq!(config.batch.annotation_mode, AnnotationMode::Mixed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_prefix_empty_rejected() {
        let mut config = BatchConfig::default();
        config.filename_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_prefix_path_traversal_rejected() {
        let mut config = BatchConfig::default();
        config.filename_prefix = "../evil".to_string();
        assert!(config.validate().is_err());

        config.filename_prefix = "a/b".to_string();
        assert!(config.validate().is_err());

        config.filename_prefix = "a\\b".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_prefix_too_long_rejected() {
        let mut config = BatchConfig::default();
        config.filename_prefix = "x".repeat(65);
        assert!(config.validate().is_err());

        config.filename_prefix = "x".repeat(64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = OrchestratorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.device, back.device);
        assert_eq!(config.batch.filename_prefix, back.batch.filename_prefix);
    }

    #[test]
    fn test_device_preference_serialization() {
        let json = serde_json::to_string(&DevicePreference::Cuda).unwrap();
        assert_eq!(json, "\"cuda\"");
        let back: DevicePreference = serde_json::from_str("\"cpu\"").unwrap();
        assert_eq!(back, DevicePreference::Cpu);
    }
}
