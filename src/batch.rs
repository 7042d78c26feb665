//! Batch queue: unattended processing of many images through the
//! shared scheduler

use crate::annotation::{Annotation, ImageShape};
use crate::config::{AnnotationMode, BatchConfig};
use crate::error::SegmentationError;
use crate::prompt::PromptBuilder;
use crate::scheduler::{InferenceScheduler, JobOutcome};
use crate::store::ResultStore;
use crate::transform::{annotation_to_model, LayerTransform};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// Lifecycle of one batch work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchItemStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One unit of unattended work: an image, its annotation set, and where
/// the output goes. A failed item carries its error and never aborts
/// sibling items.
#[derive(Debug)]
pub struct BatchItem {
    pub image_ref: PathBuf,
    pub annotations: Vec<Annotation>,
    pub transform: LayerTransform,
    pub status: BatchItemStatus,
    /// Output base name, assigned when the item is processed
    pub output_name: Option<String>,
    pub error: Option<String>,
}

/// Ordered queue of batch items, drained strictly FIFO through
/// `InferenceScheduler::submit_batch`. Sequential consumption is
/// deliberate: the shared gateway runs one job at a time, so
/// concurrency here buys nothing.
pub struct BatchQueue {
    config: BatchConfig,
    items: Vec<BatchItem>,
}

impl BatchQueue {
    pub fn new(config: BatchConfig) -> Result<Self, SegmentationError> {
        config.validate().map_err(SegmentationError::Input)?;
        Ok(Self {
            config,
            items: Vec::new(),
        })
    }

    /// Append an item. The annotation set must satisfy the configured
    /// [`AnnotationMode`]; a mismatch is an `Input` error and nothing is
    /// queued.
    pub fn enqueue(
        &mut self,
        image_ref: PathBuf,
        annotations: Vec<Annotation>,
        transform: LayerTransform,
    ) -> Result<(), SegmentationError> {
        self.check_mode(&annotations)?;
        self.items.push(BatchItem {
            image_ref,
            annotations,
            transform,
            status: BatchItemStatus::Pending,
            output_name: None,
            error: None,
        });
        Ok(())
    }

    fn check_mode(&self, annotations: &[Annotation]) -> Result<(), SegmentationError> {
        let allowed = match self.config.annotation_mode {
            AnnotationMode::Point => annotations.iter().all(|a| a.is_point()),
            AnnotationMode::Box => annotations.iter().all(|a| a.is_box()),
            AnnotationMode::Mixed => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(SegmentationError::Input(format!(
                "Annotation set violates batch annotation mode {:?}",
                self.config.annotation_mode
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Collect the image files of a directory in sorted order, for bulk
    /// enqueueing
    pub fn scan_folder(dir: &Path) -> Result<Vec<PathBuf>, SegmentationError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Process every enqueued item in FIFO order, waiting for each
    /// job's terminal state before advancing. One bad item marks itself
    /// `Failed` and processing continues; after return, every item is
    /// terminal (`Done` or `Failed`). Returns the number of items that
    /// completed successfully.
    pub async fn run_all(
        &mut self,
        scheduler: &InferenceScheduler,
        store: &mut ResultStore,
    ) -> Result<usize, SegmentationError> {
        let total = self.items.len();
        info!("Batch run started: {} items", total);
        let mut succeeded = 0;

        for index in 0..total {
            let output_name = self.output_name_for(index);
            self.items[index].status = BatchItemStatus::Running;
            self.items[index].output_name = Some(output_name.clone());

            let result = Self::process_item(
                &self.config,
                &self.items[index],
                &output_name,
                scheduler,
                store,
            )
            .await;

            match result {
                Ok(()) => {
                    self.items[index].status = BatchItemStatus::Done;
                    succeeded += 1;
                    info!(
                        "Batch item {}/{} done ({})",
                        index + 1,
                        total,
                        self.items[index].image_ref.display()
                    );
                }
                Err(e) => {
                    warn!(
                        "Batch item {}/{} failed ({}): {}",
                        index + 1,
                        total,
                        self.items[index].image_ref.display(),
                        e
                    );
                    self.items[index].status = BatchItemStatus::Failed;
                    self.items[index].error = Some(e.to_string());
                }
            }
        }

        info!("Batch run finished: {}/{} items succeeded", succeeded, total);
        Ok(succeeded)
    }

    async fn process_item(
        config: &BatchConfig,
        item: &BatchItem,
        output_name: &str,
        scheduler: &InferenceScheduler,
        store: &mut ResultStore,
    ) -> Result<(), SegmentationError> {
        // A missing or unreadable file is an Io failure; only an actual
        // decode problem counts as an Image error
        let image = image::open(&item.image_ref)
            .map_err(|e| match e {
                image::ImageError::IoError(io) => SegmentationError::Io(io),
                other => SegmentationError::Image(other),
            })?
            .to_rgb8();
        let shape = ImageShape::new(image.width(), image.height());

        let model_annotations: Vec<Annotation> = item
            .annotations
            .iter()
            .map(|a| annotation_to_model(a, shape, &item.transform))
            .collect::<Result<_, _>>()?;
        let prompt = PromptBuilder::build(&model_annotations)?;

        let handle = scheduler.submit_batch(Arc::new(image), prompt);
        match handle.wait().await {
            JobOutcome::Done(candidates) => {
                let image_key = item.image_ref.to_string_lossy().to_string();
                // Best candidate (rank 0) is the batch selection
                store.record(
                    &image_key,
                    item.annotations.clone(),
                    item.transform,
                    candidates,
                    0,
                )?;
                store.export(&image_key, &config.output_dir, output_name)?;
                Ok(())
            }
            JobOutcome::Failed(e) => Err(e),
            // Batch jobs are never cancelled by interactive activity;
            // reaching this means the scheduler went away mid-run
            JobOutcome::Cancelled => Err(SegmentationError::Model(
                "Batch job was cancelled unexpectedly".to_string(),
            )),
        }
    }

    /// Deterministic output name: image identity plus an incrementing
    /// counter, injective across a single run
    fn output_name_for(&self, index: usize) -> String {
        let stem = self.items[index]
            .image_ref
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        if self.config.use_image_name {
            format!("{}_{}_{:03}", stem, self.config.filename_prefix, index)
        } else {
            format!("{}_{:03}", self.config.filename_prefix, index)
        }
    }
}
