//! Canvas/model coordinate transforms
//!
//! Pure, explicitly parameterized conversions between the interactive
//! canvas's data space and the model's pixel space. No ambient UI state
//! is consulted; identical inputs always produce identical outputs.

use crate::annotation::{Annotation, AnnotationKind, ImageShape};
use crate::error::SegmentationError;
use serde::{Deserialize, Serialize};

/// Mapping between canvas space and image pixel space.
///
/// `scale` and `translate` are per-axis in (x, y) order:
/// `canvas = model * scale + translate`. `row_major` marks canvas layers
/// that report coordinates as (row, col) instead of (x, y); such
/// coordinates are swapped before the affine mapping is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerTransform {
    pub scale: [f64; 2],
    pub translate: [f64; 2],
    pub row_major: bool,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self {
            scale: [1.0, 1.0],
            translate: [0.0, 0.0],
            row_major: false,
        }
    }
}

impl LayerTransform {
    /// Uniform display scale with no offset
    pub fn uniform(scale: f64) -> Self {
        Self {
            scale: [scale, scale],
            translate: [0.0, 0.0],
            row_major: false,
        }
    }

    /// Validate that the transform is invertible
    pub fn validate(&self) -> Result<(), SegmentationError> {
        for (axis, &s) in self.scale.iter().enumerate() {
            if s == 0.0 || !s.is_finite() {
                return Err(SegmentationError::Input(format!(
                    "Transform scale must be finite and non-zero (axis {}: {})",
                    axis, s
                )));
            }
        }
        for (axis, &t) in self.translate.iter().enumerate() {
            if !t.is_finite() {
                return Err(SegmentationError::Input(format!(
                    "Transform translate must be finite (axis {}: {})",
                    axis, t
                )));
            }
        }
        Ok(())
    }
}

/// Convert a canvas-space point to model (image pixel) space.
///
/// Coordinates that land outside the image bounds are rejected with a
/// `Bounds` error rather than clamped: a clamp would silently corrupt
/// an ambiguous user intent.
pub fn to_model_space(
    canvas: (f64, f64),
    shape: ImageShape,
    transform: &LayerTransform,
) -> Result<(f32, f32), SegmentationError> {
    transform.validate()?;

    let (cx, cy) = if transform.row_major {
        (canvas.1, canvas.0)
    } else {
        canvas
    };

    let mx = (cx - transform.translate[0]) / transform.scale[0];
    let my = (cy - transform.translate[1]) / transform.scale[1];

    if !mx.is_finite() || !my.is_finite() {
        return Err(SegmentationError::Input(format!(
            "Canvas coordinates ({}, {}) are not finite after transform",
            canvas.0, canvas.1
        )));
    }

    if !shape.contains(mx, my) {
        return Err(SegmentationError::Bounds(format!(
            "Model coordinates ({:.2}, {:.2}) fall outside image {}x{}",
            mx, my, shape.width, shape.height
        )));
    }

    Ok((mx as f32, my as f32))
}

/// Inverse of [`to_model_space`]: convert model-space pixel coordinates
/// back to canvas space.
pub fn to_canvas_space(
    model: (f32, f32),
    transform: &LayerTransform,
) -> Result<(f64, f64), SegmentationError> {
    transform.validate()?;

    let cx = model.0 as f64 * transform.scale[0] + transform.translate[0];
    let cy = model.1 as f64 * transform.scale[1] + transform.translate[1];

    if transform.row_major {
        Ok((cy, cx))
    } else {
        Ok((cx, cy))
    }
}

/// Transform a whole annotation into model space.
///
/// Box corners are normalized so that `x0 < x1` and `y0 < y1`; a box
/// whose corners coincide on either axis is an `Input` error.
pub fn annotation_to_model(
    annotation: &Annotation,
    shape: ImageShape,
    transform: &LayerTransform,
) -> Result<Annotation, SegmentationError> {
    match annotation.kind {
        AnnotationKind::Point { x, y } => {
            let (mx, my) = to_model_space((x, y), shape, transform)?;
            Ok(Annotation {
                kind: AnnotationKind::Point {
                    x: mx as f64,
                    y: my as f64,
                },
                label: annotation.label,
            })
        }
        AnnotationKind::Box { x0, y0, x1, y1 } => {
            let (ax, ay) = to_model_space((x0, y0), shape, transform)?;
            let (bx, by) = to_model_space((x1, y1), shape, transform)?;
            let (min_x, max_x) = if ax <= bx { (ax, bx) } else { (bx, ax) };
            let (min_y, max_y) = if ay <= by { (ay, by) } else { (by, ay) };
            if min_x == max_x || min_y == max_y {
                return Err(SegmentationError::Input(format!(
                    "Degenerate box after transform: ({}, {}) .. ({}, {})",
                    min_x, min_y, max_x, max_y
                )));
            }
            Ok(Annotation {
                kind: AnnotationKind::Box {
                    x0: min_x as f64,
                    y0: min_y as f64,
                    x1: max_x as f64,
                    y1: max_y as f64,
                },
                label: annotation.label,
            })
        }
    }
}
