//! Durable record of produced masks, export, and label-layer commit

use crate::annotation::Annotation;
use crate::error::SegmentationError;
use crate::mask::MaskCandidate;
use crate::transform::LayerTransform;
use chrono::{DateTime, Utc};
use image::{ImageBuffer, ImageFormat, Luma};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One recorded inference result for an image
#[derive(Debug, Clone)]
pub struct RecordedResult {
    pub image_ref: String,
    /// Originating annotations in canvas space
    pub annotations: Vec<Annotation>,
    pub transform: LayerTransform,
    pub candidates: Vec<MaskCandidate>,
    pub selected_rank: usize,
    /// Captured at record time so that re-export is byte-identical
    pub recorded_at: DateTime<Utc>,
}

impl RecordedResult {
    pub fn selected(&self) -> &MaskCandidate {
        &self.candidates[self.selected_rank]
    }
}

/// Structured sidecar written next to each exported mask raster
#[derive(Debug, Serialize)]
struct SidecarRecord<'a> {
    image_ref: &'a str,
    annotations: &'a [Annotation],
    scale: [f64; 2],
    translate: [f64; 2],
    selected_rank: usize,
    score: f32,
    recorded_at: DateTime<Utc>,
}

/// Paths produced by one export call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub mask_path: PathBuf,
    pub sidecar_path: PathBuf,
}

/// Discrete-label image layer accumulated from committed masks, for
/// external rendering
#[derive(Debug, Clone)]
pub struct LabelMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

impl LabelMap {
    fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize)],
        }
    }

    /// Distinct non-zero labels present, ascending
    pub fn labels(&self) -> Vec<u16> {
        let mut labels: Vec<u16> = self.data.iter().copied().filter(|&v| v > 0).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    pub fn area_of(&self, label: u16) -> usize {
        self.data.iter().filter(|&&v| v == label).count()
    }
}

#[derive(Debug, Serialize)]
struct LabelInfoEntry {
    label: u16,
    area: usize,
}

#[derive(Debug, Serialize)]
struct LabelInfoRecord<'a> {
    image_ref: &'a str,
    labels: Vec<LabelInfoEntry>,
}

/// In-memory store of produced results per image, feeding export and
/// label-layer commit. Export failures leave the store untouched, so a
/// failed export is retryable without recomputing inference.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: HashMap<String, RecordedResult>,
    label_maps: HashMap<String, LabelMap>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the candidates and selection for an image, replacing any
    /// previous record for the same reference.
    pub fn record(
        &mut self,
        image_ref: &str,
        annotations: Vec<Annotation>,
        transform: LayerTransform,
        candidates: Vec<MaskCandidate>,
        selected_rank: usize,
    ) -> Result<(), SegmentationError> {
        if candidates.is_empty() {
            return Err(SegmentationError::Input(
                "Cannot record a result without candidates".to_string(),
            ));
        }
        if selected_rank >= candidates.len() {
            return Err(SegmentationError::Input(format!(
                "Selected rank {} out of range (have {} candidates)",
                selected_rank,
                candidates.len()
            )));
        }

        debug!(
            "Recording result for {} ({} candidates, rank {} selected)",
            image_ref,
            candidates.len(),
            selected_rank
        );
        self.results.insert(
            image_ref.to_string(),
            RecordedResult {
                image_ref: image_ref.to_string(),
                annotations,
                transform,
                candidates,
                selected_rank,
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn get(&self, image_ref: &str) -> Option<&RecordedResult> {
        self.results.get(image_ref)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Export the recorded result for an image: a single-channel PNG
    /// raster of the selected mask (object pixels carry label index 1)
    /// plus a JSON sidecar. Exporting the same record twice produces
    /// byte-identical files.
    pub fn export(
        &self,
        image_ref: &str,
        output_dir: &Path,
        base_name: &str,
    ) -> Result<ExportPaths, SegmentationError> {
        let result = self.results.get(image_ref).ok_or_else(|| {
            SegmentationError::Input(format!("No recorded result for {}", image_ref))
        })?;

        fs::create_dir_all(output_dir)?;

        let mask_path = output_dir.join(format!("{}.png", base_name));
        let sidecar_path = output_dir.join(format!("{}.json", base_name));

        let selected = result.selected();
        let raster = selected.mask.to_raster(1);
        raster
            .save_with_format(&mask_path, ImageFormat::Png)
            .map_err(SegmentationError::Image)?;

        let sidecar = SidecarRecord {
            image_ref: &result.image_ref,
            annotations: &result.annotations,
            scale: result.transform.scale,
            translate: result.transform.translate,
            selected_rank: result.selected_rank,
            score: selected.score,
            recorded_at: result.recorded_at,
        };
        let json = serde_json::to_vec_pretty(&sidecar).map_err(|e| {
            SegmentationError::Input(format!("Failed to serialize sidecar: {}", e))
        })?;
        fs::write(&sidecar_path, json)?;

        info!("Exported {} to {:?}", image_ref, mask_path);
        Ok(ExportPaths {
            mask_path,
            sidecar_path,
        })
    }

    /// Merge the selected mask of an image's record into that image's
    /// label map under `label_id`. Later commits overwrite overlapping
    /// pixels.
    pub fn commit_label(
        &mut self,
        image_ref: &str,
        label_id: u16,
    ) -> Result<(), SegmentationError> {
        if label_id == 0 {
            return Err(SegmentationError::Input(
                "Label id 0 is reserved for background".to_string(),
            ));
        }
        let result = self.results.get(image_ref).ok_or_else(|| {
            SegmentationError::Input(format!("No recorded result for {}", image_ref))
        })?;
        let mask = &result.selected().mask;

        let map = self
            .label_maps
            .entry(image_ref.to_string())
            .or_insert_with(|| LabelMap::empty(mask.width, mask.height));

        if map.width != mask.width || map.height != mask.height {
            return Err(SegmentationError::Input(format!(
                "Mask {}x{} does not match label map {}x{}",
                mask.width, mask.height, map.width, map.height
            )));
        }

        for (dst, &src) in map.data.iter_mut().zip(mask.pixels.iter()) {
            if src > 0 {
                *dst = label_id;
            }
        }
        debug!("Committed label {} for {}", label_id, image_ref);
        Ok(())
    }

    pub fn label_map(&self, image_ref: &str) -> Option<&LabelMap> {
        self.label_maps.get(image_ref)
    }

    /// Write the accumulated label map as a 16-bit grayscale PNG
    pub fn export_label_map(
        &self,
        image_ref: &str,
        path: &Path,
    ) -> Result<(), SegmentationError> {
        let map = self.label_maps.get(image_ref).ok_or_else(|| {
            SegmentationError::Input(format!("No label map for {}", image_ref))
        })?;

        let raster: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(map.width, map.height, map.data.clone()).ok_or_else(|| {
                SegmentationError::Input("Label map dimensions inconsistent".to_string())
            })?;
        raster
            .save_with_format(path, ImageFormat::Png)
            .map_err(SegmentationError::Image)?;
        info!("Exported label map for {} to {:?}", image_ref, path);
        Ok(())
    }

    /// Write a JSON summary of the labels present in an image's map
    pub fn export_label_info(
        &self,
        image_ref: &str,
        path: &Path,
    ) -> Result<(), SegmentationError> {
        let map = self.label_maps.get(image_ref).ok_or_else(|| {
            SegmentationError::Input(format!("No label map for {}", image_ref))
        })?;

        let record = LabelInfoRecord {
            image_ref,
            labels: map
                .labels()
                .into_iter()
                .map(|label| LabelInfoEntry {
                    label,
                    area: map.area_of(label),
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|e| {
            SegmentationError::Input(format!("Failed to serialize label info: {}", e))
        })?;
        fs::write(path, json)?;
        Ok(())
    }
}
