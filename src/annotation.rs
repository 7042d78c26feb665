//! Annotation value types consumed from the visualization layer

use serde::{Deserialize, Serialize};

/// Foreground/background label for a point annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointLabel {
    Foreground,
    Background,
}

impl Default for PointLabel {
    fn default() -> Self {
        PointLabel::Foreground
    }
}

impl PointLabel {
    /// Numeric encoding expected by SAM-style predictors (1 = foreground, 0 = background)
    pub fn as_model_label(&self) -> f32 {
        match self {
            PointLabel::Foreground => 1.0,
            PointLabel::Background => 0.0,
        }
    }
}

/// Geometry of a single annotation, in canvas space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnnotationKind {
    /// A single click at (x, y)
    Point { x: f64, y: f64 },
    /// A rectangle given by two opposite corners; any corner order is
    /// accepted here, normalization happens when the prompt is built
    Box { x0: f64, y0: f64, x1: f64, y1: f64 },
}

/// One user annotation, immutable once captured for a request.
///
/// A request holds an ordered sequence of these; the order matters for
/// how point labels are displayed, not for inference correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(flatten)]
    pub kind: AnnotationKind,
    /// Only meaningful for points; boxes carry the default
    #[serde(default)]
    pub label: PointLabel,
}

impl Annotation {
    /// Foreground point at canvas coordinates (x, y)
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            kind: AnnotationKind::Point { x, y },
            label: PointLabel::Foreground,
        }
    }

    /// Labeled point at canvas coordinates (x, y)
    pub fn labeled_point(x: f64, y: f64, label: PointLabel) -> Self {
        Self {
            kind: AnnotationKind::Point { x, y },
            label,
        }
    }

    /// Box annotation from two opposite corners
    pub fn bounding_box(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            kind: AnnotationKind::Box { x0, y0, x1, y1 },
            label: PointLabel::Foreground,
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self.kind, AnnotationKind::Point { .. })
    }

    pub fn is_box(&self) -> bool {
        matches!(self.kind, AnnotationKind::Box { .. })
    }
}

/// Image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: u32,
    pub height: u32,
}

impl ImageShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether pixel coordinates (x, y) fall inside the image
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
}
