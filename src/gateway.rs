//! Inference gateway: the sole owner of the exclusive model resource

use crate::error::SegmentationError;
use crate::mask::MaskCandidate;
use crate::prompt::Prompt;
use image::RgbImage;
use tracing::debug;

/// Capability contract for a segmentation backend.
///
/// A backend turns one image plus one prompt into a set of scored mask
/// proposals. Implementations are free to hold mutable execution state
/// (sessions, cached embeddings); the scheduler guarantees calls are
/// serialized, so no internal locking is required.
pub trait SegmentationBackend: Send {
    fn run(
        &mut self,
        image: &RgbImage,
        prompt: &Prompt,
    ) -> Result<Vec<MaskCandidate>, SegmentationError>;
}

/// Wraps the single loaded backend instance.
///
/// This is the only component permitted to invoke the model. Calling
/// [`InferenceGateway::run`] concurrently from two callers is forbidden
/// by contract; the scheduler's single dispatch worker enforces it.
pub struct InferenceGateway {
    backend: Box<dyn SegmentationBackend>,
    /// When false, only the best-scoring proposal is surfaced
    /// (`OrchestratorConfig::multimask_output`)
    multimask: bool,
}

impl InferenceGateway {
    pub fn new(backend: Box<dyn SegmentationBackend>, multimask: bool) -> Self {
        Self { backend, multimask }
    }

    /// Run one prompt through the model and return candidates ordered
    /// by non-increasing score, with stable positional ranks assigned.
    /// In single-mask mode only the best-scoring candidate is returned.
    pub fn run(
        &mut self,
        image: &RgbImage,
        prompt: &Prompt,
    ) -> Result<Vec<MaskCandidate>, SegmentationError> {
        if prompt.is_empty() {
            return Err(SegmentationError::Input(
                "Prompt carries no points and no box".to_string(),
            ));
        }

        let mut candidates = self.backend.run(image, prompt)?;

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if !self.multimask {
            candidates.truncate(1);
        }
        for (rank, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = rank;
        }

        debug!("Gateway produced {} mask candidates", candidates.len());
        Ok(candidates)
    }
}
