//! Checkpoint auto-download with checksum verification

use crate::config::OrchestratorConfig;
use crate::error::SegmentationError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// MobileSAM checkpoint source. The published weights are a PyTorch
/// checkpoint and are saved under that name; the ort backend needs an
/// ONNX export of them and refuses to load a `.pt` file.
const MOBILE_SAM_URL: &str =
    "https://github.com/ChaoningZhang/MobileSAM/raw/master/weights/mobile_sam.pt";
const MOBILE_SAM_NAME: &str = "mobile_sam.pt";
// No published digest for the upstream checkpoint; pin one here once a
// mirrored copy is hosted
const MOBILE_SAM_CHECKSUM: &str = "";

const MAX_MODEL_SIZE: usize = 2_000_000_000; // 2GB max
const DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

/// Downloads model checkpoints into the configured model directory,
/// skipping files that already exist.
pub struct ModelFetcher {
    config: Arc<OrchestratorConfig>,
}

impl ModelFetcher {
    pub fn new(config: Arc<OrchestratorConfig>) -> Self {
        Self { config }
    }

    /// Ensure the model directory exists
    pub fn ensure_model_dir(&self) -> Result<PathBuf, SegmentationError> {
        let model_path = &self.config.model_path;
        if !model_path.exists() {
            fs::create_dir_all(model_path)?;
            info!("Created model directory: {:?}", model_path);
        }
        Ok(model_path.clone())
    }

    /// Download a model if not already present
    pub async fn ensure_model(
        &self,
        model_name: &str,
        url: &str,
        checksum: &str,
    ) -> Result<PathBuf, SegmentationError> {
        // Model name becomes a file name; keep it inside the model dir
        if model_name.is_empty() || model_name.len() > 255 {
            return Err(SegmentationError::Input("Invalid model name".to_string()));
        }
        if model_name.contains("..") || model_name.contains('/') || model_name.contains('\\') {
            return Err(SegmentationError::Input(
                "Model name contains invalid characters".to_string(),
            ));
        }

        if url.is_empty() || url.len() > 2048 {
            return Err(SegmentationError::Input("Invalid URL".to_string()));
        }
        if !url.starts_with("https://") {
            return Err(SegmentationError::Input(
                "Only HTTPS URLs are allowed for model downloads".to_string(),
            ));
        }

        self.ensure_model_dir()?;
        let model_path = self.config.model_path.join(model_name);

        if model_path.exists() {
            info!("Model {} already exists at {:?}", model_name, model_path);
            return Ok(model_path);
        }

        info!("Downloading model {} from {}", model_name, url);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;

        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SegmentationError::Model(format!(
                "Failed to download model: HTTP {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > MAX_MODEL_SIZE as u64 {
                return Err(SegmentationError::Model(format!(
                    "Model too large: {} bytes (max {} bytes)",
                    content_length, MAX_MODEL_SIZE
                )));
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_MODEL_SIZE {
            return Err(SegmentationError::Model(format!(
                "Downloaded model too large: {} bytes (max {} bytes)",
                bytes.len(),
                MAX_MODEL_SIZE
            )));
        }
        if bytes.len() < 1024 {
            return Err(SegmentationError::Model(
                "Downloaded file too small, likely corrupted".to_string(),
            ));
        }

        if !checksum.is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let computed = hex::encode(hasher.finalize());
            if computed != checksum {
                return Err(SegmentationError::Model(format!(
                    "Checksum mismatch for model {}: expected {}, got {}",
                    model_name, checksum, computed
                )));
            }
            info!("Verified checksum for model {}", model_name);
        } else {
            warn!(
                "No checksum pinned for model {}; downloaded {} bytes unverified",
                model_name,
                bytes.len()
            );
        }

        // Write via temp file + rename so a partial download never
        // masquerades as a valid checkpoint
        let temp_path = model_path.with_extension("tmp");
        fs::write(&temp_path, &bytes)?;
        fs::rename(&temp_path, &model_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            SegmentationError::Io(e)
        })?;

        info!("Model {} saved to {:?}", model_name, model_path);
        Ok(model_path)
    }

    /// Get the MobileSAM checkpoint path, downloading if needed. The
    /// returned file is the published PyTorch checkpoint; it must be
    /// exported to ONNX before `OnnxSamBackend` will accept it.
    pub async fn get_mobile_sam(&self) -> Result<PathBuf, SegmentationError> {
        self.ensure_model(MOBILE_SAM_NAME, MOBILE_SAM_URL, MOBILE_SAM_CHECKSUM)
            .await
    }
}
