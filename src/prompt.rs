//! Prompt construction from validated annotations

use crate::annotation::{Annotation, AnnotationKind, PointLabel};
use crate::error::SegmentationError;
use serde::{Deserialize, Serialize};

/// One labeled point in model space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromptPoint {
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

/// One bounding box in model space, with `x0 < x1` and `y0 < y1` enforced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromptBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl PromptBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Result<Self, SegmentationError> {
        if !(x0 < x1 && y0 < y1) {
            return Err(SegmentationError::Input(format!(
                "Malformed box ({}, {}, {}, {}): requires x0 < x1 and y0 < y1",
                x0, y0, x1, y1
            )));
        }
        Ok(Self { x0, y0, x1, y1 })
    }
}

/// Normalized inference request: point triples and/or one box, all in
/// model space. Built once per request, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub points: Vec<PromptPoint>,
    pub bbox: Option<PromptBox>,
}

impl Prompt {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.bbox.is_none()
    }
}

/// Stateless prompt builder.
///
/// Input annotations are expected in model space already (see
/// [`crate::transform::annotation_to_model`]). Constraints mirror the
/// upstream predictor interface: at least one annotation, at most one
/// box, points and a box may coexist.
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(annotations: &[Annotation]) -> Result<Prompt, SegmentationError> {
        if annotations.is_empty() {
            return Err(SegmentationError::Input(
                "At least one annotation is required to build a prompt".to_string(),
            ));
        }

        let mut points = Vec::new();
        let mut bbox: Option<PromptBox> = None;

        for annotation in annotations {
            match annotation.kind {
                AnnotationKind::Point { x, y } => {
                    points.push(PromptPoint {
                        x: x as f32,
                        y: y as f32,
                        label: annotation.label,
                    });
                }
                AnnotationKind::Box { x0, y0, x1, y1 } => {
                    if bbox.is_some() {
                        return Err(SegmentationError::Input(
                            "Only one box annotation is supported per prompt".to_string(),
                        ));
                    }
                    bbox = Some(PromptBox::new(x0 as f32, y0 as f32, x1 as f32, y1 as f32)?);
                }
            }
        }

        Ok(Prompt { points, bbox })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_annotations_rejected() {
        match PromptBuilder::build(&[]) {
            Err(SegmentationError::Input(_)) => {}
            other => panic!("Expected Input error, got {:?}", other),
        }
    }

    #[test]
    fn test_points_only() {
        let prompt = PromptBuilder::build(&[
            Annotation::point(10.0, 20.0),
            Annotation::labeled_point(30.0, 40.0, PointLabel::Background),
        ])
        .unwrap();
        assert_eq!(prompt.points.len(), 2);
        assert!(prompt.bbox.is_none());
        assert_eq!(prompt.points[0].label, PointLabel::Foreground);
        assert_eq!(prompt.points[1].label, PointLabel::Background);
    }

    #[test]
    fn test_points_and_box_coexist() {
        let prompt = PromptBuilder::build(&[
            Annotation::bounding_box(0.0, 0.0, 100.0, 100.0),
            Annotation::point(50.0, 50.0),
        ])
        .unwrap();
        assert_eq!(prompt.points.len(), 1);
        let b = prompt.bbox.unwrap();
        assert_eq!((b.x0, b.y0, b.x1, b.y1), (0.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn test_second_box_rejected() {
        let result = PromptBuilder::build(&[
            Annotation::bounding_box(0.0, 0.0, 10.0, 10.0),
            Annotation::bounding_box(20.0, 20.0, 30.0, 30.0),
        ]);
        match result {
            Err(SegmentationError::Input(msg)) => assert!(msg.contains("one box")),
            other => panic!("Expected Input error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_box_rejected() {
        assert!(PromptBox::new(10.0, 0.0, 10.0, 5.0).is_err());
        assert!(PromptBox::new(10.0, 0.0, 5.0, 5.0).is_err());
        assert!(PromptBox::new(0.0, 5.0, 10.0, 5.0).is_err());
        assert!(PromptBox::new(0.0, 0.0, 10.0, 5.0).is_ok());
    }

    #[test]
    fn test_annotation_order_preserved_in_points() {
        let prompt = PromptBuilder::build(&[
            Annotation::point(1.0, 1.0),
            Annotation::point(2.0, 2.0),
            Annotation::point(3.0, 3.0),
        ])
        .unwrap();
        let xs: Vec<f32> = prompt.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    }
}
