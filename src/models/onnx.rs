//! ONNX Runtime backend for SAM-style promptable segmentation

use crate::config::DevicePreference;
use crate::error::SegmentationError;
use crate::gateway::SegmentationBackend;
use crate::mask::{MaskCandidate, MaskData};
use crate::prompt::Prompt;
use image::RgbImage;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::{Session, SessionInputValue, SessionOutputs};
use ort::value::{Tensor, Value};
use std::path::Path;
use tracing::info;

/// The SAM decoder emits logits; positive values are object pixels
const MASK_THRESHOLD: f32 = 0.0;
/// Fallback when the model exposes no score output
const DEFAULT_SCORE: f32 = 0.9;
const MAX_PROMPT_POINTS: usize = 100;

/// MobileSAM inference backend.
///
/// Performs the dtype/precision normalization the model requires at
/// this boundary: image pixels to CHW `f32` in [0, 1], prompt
/// coordinates rescaled to the model input resolution as `f32`, labels
/// as `f32`. Silently wrong precision here would produce garbage masks
/// rather than an error, so every conversion is explicit.
pub struct OnnxSamBackend {
    session: Session,
    input_size: (u32, u32),
}

impl OnnxSamBackend {
    /// Load the model from `model_path` on the preferred device. An
    /// unavailable or misconfigured backend is a `Device` error.
    pub fn new(model_path: &Path, device: DevicePreference) -> Result<Self, SegmentationError> {
        // The fetcher delivers the published PyTorch checkpoint; refuse
        // it here with a usable message instead of an opaque parse error
        let is_onnx = model_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("onnx"))
            .unwrap_or(false);
        if !is_onnx {
            return Err(SegmentationError::Model(format!(
                "Model file {:?} is not an ONNX export; convert the checkpoint to .onnx first",
                model_path
            )));
        }

        let providers = match device {
            DevicePreference::Cpu => vec![CPUExecutionProvider::default().build()],
            DevicePreference::Cuda => vec![CUDAExecutionProvider::default().build()],
            DevicePreference::Auto => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        };

        let session = Session::builder()
            .and_then(|b| b.with_execution_providers(providers))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                SegmentationError::Device(format!(
                    "Failed to load segmentation model on {:?}: {}",
                    device, e
                ))
            })?;

        info!("Segmentation model loaded from {:?} ({:?})", model_path, device);

        Ok(Self {
            session,
            // SAM standard input resolution
            input_size: (1024, 1024),
        })
    }

    fn preprocess(
        &self,
        image: &RgbImage,
        prompt: &Prompt,
    ) -> Result<Vec<Value>, SegmentationError> {
        let (orig_w, orig_h) = (image.width(), image.height());
        if orig_w == 0 || orig_h == 0 {
            return Err(SegmentationError::Input(
                "Image has zero width or height".to_string(),
            ));
        }

        let (in_w, in_h) = self.input_size;
        let resized = image::imageops::resize(
            image,
            in_w,
            in_h,
            image::imageops::FilterType::Triangle,
        );

        // CHW f32 in [0, 1], batch dimension prepended
        let plane = (in_w as usize) * (in_h as usize);
        let total = plane
            .checked_mul(3)
            .ok_or_else(|| SegmentationError::Model("Input tensor size overflow".to_string()))?;
        let mut image_data = vec![0.0f32; total];
        for (y, row) in resized.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                let offset = y * in_w as usize + x;
                image_data[offset] = pixel.0[0] as f32 / 255.0;
                image_data[plane + offset] = pixel.0[1] as f32 / 255.0;
                image_data[2 * plane + offset] = pixel.0[2] as f32 / 255.0;
            }
        }
        let image_shape = vec![1usize, 3, in_h as usize, in_w as usize];
        let image_input = Tensor::from_array(
            ndarray::Array::from_shape_vec(image_shape.as_slice(), image_data)
                .map_err(|e| SegmentationError::Model(format!("Failed to build image array: {}", e)))?,
        )
        .map_err(|e| SegmentationError::Model(format!("Failed to build image value: {}", e)))?
        .into_dyn();

        // Prompt coordinates rescaled from image pixel space to the
        // model input resolution; a box becomes two corner points with
        // the SAM decoder labels 2 and 3
        let scale_x = in_w as f32 / orig_w as f32;
        let scale_y = in_h as f32 / orig_h as f32;

        let mut point_data = Vec::new();
        let mut label_data = Vec::new();
        for point in prompt.points.iter().take(MAX_PROMPT_POINTS) {
            point_data.push(point.x * scale_x);
            point_data.push(point.y * scale_y);
            label_data.push(point.label.as_model_label());
        }
        if let Some(bbox) = &prompt.bbox {
            point_data.push(bbox.x0 * scale_x);
            point_data.push(bbox.y0 * scale_y);
            label_data.push(2.0);
            point_data.push(bbox.x1 * scale_x);
            point_data.push(bbox.y1 * scale_y);
            label_data.push(3.0);
        }

        let num_points = label_data.len();
        if num_points == 0 {
            return Err(SegmentationError::Input(
                "Prompt carries no points and no box".to_string(),
            ));
        }

        let point_shape = vec![1usize, num_points, 2];
        let point_input = Tensor::from_array(
            ndarray::Array::from_shape_vec(point_shape.as_slice(), point_data)
                .map_err(|e| SegmentationError::Model(format!("Failed to build point array: {}", e)))?,
        )
        .map_err(|e| SegmentationError::Model(format!("Failed to build point value: {}", e)))?
        .into_dyn();

        let label_shape = vec![1usize, num_points];
        let label_input = Tensor::from_array(
            ndarray::Array::from_shape_vec(label_shape.as_slice(), label_data)
                .map_err(|e| SegmentationError::Model(format!("Failed to build label array: {}", e)))?,
        )
        .map_err(|e| SegmentationError::Model(format!("Failed to build label value: {}", e)))?
        .into_dyn();

        Ok(vec![image_input, point_input, label_input])
    }

    fn postprocess(
        outputs: &SessionOutputs<'_>,
        image: &RgbImage,
    ) -> Result<Vec<MaskCandidate>, SegmentationError> {
        if outputs.len() == 0 {
            return Err(SegmentationError::Model(
                "Model produced no outputs".to_string(),
            ));
        }

        let mask_array = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| SegmentationError::Model(format!("Failed to extract mask tensor: {}", e)))?;
        let shape = mask_array.shape();
        if shape.len() < 4 {
            return Err(SegmentationError::Model(format!(
                "Unexpected mask tensor rank {} (want 4)",
                shape.len()
            )));
        }

        let num_masks = shape[1];
        let mask_h = shape[2];
        let mask_w = shape[3];
        if mask_h == 0 || mask_w == 0 {
            return Err(SegmentationError::Model("Empty mask dimensions".to_string()));
        }
        if mask_h * mask_w > 100_000_000 {
            return Err(SegmentationError::Model(
                "Mask output too large (max 100M pixels)".to_string(),
            ));
        }

        let scores = (outputs.len() > 1)
            .then(|| &outputs[1])
            .and_then(|v| v.try_extract_array::<f32>().ok());

        let (orig_w, orig_h) = (image.width() as usize, image.height() as usize);
        let mut candidates = Vec::with_capacity(num_masks);

        for mask_idx in 0..num_masks {
            // Resample to the source resolution (nearest neighbor);
            // candidates must share the input image's spatial dims
            let mut mask = MaskData::empty(orig_w as u32, orig_h as u32);
            for y in 0..orig_h {
                let src_y = y * mask_h / orig_h;
                for x in 0..orig_w {
                    let src_x = x * mask_w / orig_w;
                    if let Some(&value) = mask_array.get([0, mask_idx, src_y, src_x]) {
                        if value.is_finite() && value > MASK_THRESHOLD {
                            mask.pixels[y * orig_w + x] = 1;
                        }
                    }
                }
            }

            let score = scores
                .as_ref()
                .and_then(|s| s.get([0, mask_idx]).copied())
                .filter(|s| s.is_finite())
                .unwrap_or(DEFAULT_SCORE);

            candidates.push(MaskCandidate {
                mask,
                score,
                rank: mask_idx,
            });
        }

        Ok(candidates)
    }
}

impl SegmentationBackend for OnnxSamBackend {
    fn run(
        &mut self,
        image: &RgbImage,
        prompt: &Prompt,
    ) -> Result<Vec<MaskCandidate>, SegmentationError> {
        let inputs: Vec<SessionInputValue<'_>> = self
            .preprocess(image, prompt)?
            .into_iter()
            .map(SessionInputValue::from)
            .collect();

        let outputs = self
            .session
            .run(inputs.as_slice())
            .map_err(|e| SegmentationError::Model(format!("Inference failed: {}", e)))?;

        Self::postprocess(&outputs, image)
    }
}
