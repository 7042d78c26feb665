//! maskflow: annotation-to-inference orchestration for interactive
//! image segmentation
//!
//! A user annotates an image with points or boxes; a promptable
//! segmentation model produces ranked mask candidates that the user
//! reviews, selects, and exports, optionally across a queue of many
//! images. This crate is the orchestration layer between the two:
//! coordinate transformation, prompt construction, asynchronous job
//! scheduling with cancellation, candidate management, batch
//! sequencing, and result recording/export. The model itself and the
//! rendering widgets are external collaborators.

pub mod annotation;
pub mod batch;
pub mod candidates;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mask;
pub mod models;
pub mod prompt;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transform;

pub use annotation::{Annotation, AnnotationKind, ImageShape, PointLabel};
pub use batch::{BatchItem, BatchItemStatus, BatchQueue};
pub use candidates::CandidateSelector;
pub use config::{AnnotationMode, BatchConfig, DevicePreference, OrchestratorConfig};
pub use error::SegmentationError;
pub use gateway::{InferenceGateway, SegmentationBackend};
pub use mask::{MaskCandidate, MaskData};
pub use prompt::{Prompt, PromptBox, PromptBuilder, PromptPoint};
pub use scheduler::{InferenceScheduler, JobHandle, JobOrigin, JobOutcome, JobStatus};
pub use session::{BoundaryOp, Session, SessionOutcome};
pub use store::{ExportPaths, LabelMap, RecordedResult, ResultStore};
pub use transform::{annotation_to_model, to_canvas_space, to_model_space, LayerTransform};
