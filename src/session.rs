//! Interactive session: the live annotation/inference context

use crate::annotation::{Annotation, ImageShape};
use crate::candidates::CandidateSelector;
use crate::error::SegmentationError;
use crate::mask::MaskCandidate;
use crate::prompt::PromptBuilder;
use crate::scheduler::{InferenceScheduler, JobHandle, JobOutcome, JobStatus};
use crate::store::ResultStore;
use crate::transform::{annotation_to_model, LayerTransform};
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, info};

/// Direction for one-step mask boundary adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryOp {
    Grow,
    Shrink,
}

/// Result of awaiting the active interactive job
#[derive(Debug)]
pub enum SessionOutcome {
    /// Candidates were produced and installed in the selector
    Candidates(usize),
    Cancelled,
    Failed(SegmentationError),
}

/// The interactive context: current image, current annotation set, at
/// most one active inference job, and the candidate selection state.
/// Exactly one session exists per running instance; it is the sole
/// owner of its active job reference.
pub struct Session {
    image_ref: Option<String>,
    image: Option<Arc<RgbImage>>,
    transform: LayerTransform,
    annotations: Vec<Annotation>,
    selector: CandidateSelector,
    active: Option<JobHandle>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            image_ref: None,
            image: None,
            transform: LayerTransform::default(),
            annotations: Vec::new(),
            selector: CandidateSelector::new(),
            active: None,
        }
    }

    /// Make `image` the current image. Any active job is cancelled and
    /// the annotation set and candidates are cleared.
    pub fn set_image(&mut self, image_ref: &str, image: RgbImage, transform: LayerTransform) {
        info!("Session image set to {}", image_ref);
        self.cancel_active();
        self.image_ref = Some(image_ref.to_string());
        self.image = Some(Arc::new(image));
        self.transform = transform;
        self.annotations.clear();
        self.selector.clear();
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image_ref.as_deref()
    }

    pub fn image_shape(&self) -> Option<ImageShape> {
        self.image
            .as_ref()
            .map(|img| ImageShape::new(img.width(), img.height()))
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Append an annotation to the current set (canvas space)
    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Discard the annotation set. Prior candidates become stale and
    /// are cleared; an active job is cancelled.
    pub fn clear_annotations(&mut self) {
        debug!("Session annotations cleared");
        self.cancel_active();
        self.annotations.clear();
        self.selector.clear();
    }

    /// Validate and submit the current annotation set as an interactive
    /// job. `Input`/`Bounds` errors surface here, synchronously, and
    /// never reach the scheduler. A previously active job is cancelled
    /// before the new one is queued. Returns without waiting for the
    /// inference result.
    pub fn submit(&mut self, scheduler: &InferenceScheduler) -> Result<(), SegmentationError> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| SegmentationError::Input("No image set in session".to_string()))?
            .clone();
        let shape = ImageShape::new(image.width(), image.height());

        let model_annotations: Vec<Annotation> = self
            .annotations
            .iter()
            .map(|a| annotation_to_model(a, shape, &self.transform))
            .collect::<Result<_, _>>()?;
        let prompt = PromptBuilder::build(&model_annotations)?;

        self.cancel_active();
        self.selector.clear();

        let handle = scheduler.submit_interactive(image, prompt);
        debug!("Session submitted interactive job {}", handle.id());
        self.active = Some(handle);
        Ok(())
    }

    pub fn active_status(&self) -> Option<JobStatus> {
        self.active.as_ref().map(|h| h.status())
    }

    /// Await the active job's terminal outcome. On completion the
    /// candidates are installed in the selector; cancellation and
    /// failure leave the selector empty. Returns `None` when no job is
    /// active.
    pub async fn wait_result(&mut self) -> Option<SessionOutcome> {
        let handle = self.active.take()?;
        match handle.wait().await {
            JobOutcome::Done(candidates) => {
                let count = candidates.len();
                self.selector.set_candidates(candidates);
                Some(SessionOutcome::Candidates(count))
            }
            JobOutcome::Cancelled => Some(SessionOutcome::Cancelled),
            JobOutcome::Failed(e) => Some(SessionOutcome::Failed(e)),
        }
    }

    pub fn candidates(&self) -> &[MaskCandidate] {
        self.selector.candidates()
    }

    /// Mark the candidate at `rank` as chosen
    pub fn select(&mut self, rank: usize) -> Result<(), SegmentationError> {
        self.selector.select(rank)
    }

    /// The chosen candidate, or the highest-ranked one by default
    pub fn current_candidate(&self) -> Option<&MaskCandidate> {
        self.selector.current()
    }

    /// Grow or shrink the chosen candidate's mask boundary by one
    /// morphological step
    pub fn adjust_selected(&mut self, op: BoundaryOp) -> Result<(), SegmentationError> {
        let candidate = self.selector.current_mut().ok_or_else(|| {
            SegmentationError::Input("No mask candidate available to adjust".to_string())
        })?;
        candidate.mask = match op {
            BoundaryOp::Grow => candidate.mask.dilate(),
            BoundaryOp::Shrink => candidate.mask.erode(),
        };
        Ok(())
    }

    /// Snapshot the current candidates and selection into the store
    pub fn record_to(&self, store: &mut ResultStore) -> Result<(), SegmentationError> {
        let image_ref = self
            .image_ref
            .as_deref()
            .ok_or_else(|| SegmentationError::Input("No image set in session".to_string()))?;
        let selected_rank = self.selector.current_rank().ok_or_else(|| {
            SegmentationError::Input("No candidates to record".to_string())
        })?;
        store.record(
            image_ref,
            self.annotations.clone(),
            self.transform,
            self.selector.candidates().to_vec(),
            selected_rank,
        )
    }

    fn cancel_active(&mut self) {
        if let Some(handle) = self.active.take() {
            if !handle.status().is_terminal() {
                debug!("Cancelling active session job {}", handle.id());
                handle.cancel();
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
