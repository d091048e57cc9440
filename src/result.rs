use geo::Coord;

use crate::error::{OcrError, Result};

/// Four corner points ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadBox {
    pub points: [Coord<f32>; 4],
}

impl QuadBox {
    pub fn new(points: [Coord<f32>; 4]) -> Self {
        Self { points }
    }

    /// Builds a box from an arbitrary point list, failing unless it holds
    /// exactly four finite points.
    pub fn try_from_points(points: &[Coord<f32>]) -> Result<Self> {
        let points: [Coord<f32>; 4] = points
            .try_into()
            .map_err(|_| OcrError::MalformedQuad {
                points: points.len(),
            })?;
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(OcrError::MalformedQuad { points: 4 });
        }
        Ok(Self { points })
    }

    /// Axis-aligned box spanning `min` to `max`.
    pub fn from_envelope(min: Coord<f32>, max: Coord<f32>) -> Self {
        Self::new([
            min,
            Coord { x: max.x, y: min.y },
            max,
            Coord { x: min.x, y: max.y },
        ])
    }

    pub fn top_left(&self) -> Coord<f32> {
        self.points[0]
    }

    pub fn min_x(&self) -> f32 {
        self.points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min)
    }

    pub fn max_x(&self) -> f32 {
        self.points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn min_y(&self) -> f32 {
        self.points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min)
    }

    pub fn max_y(&self) -> f32 {
        self.points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn height(&self) -> f32 {
        self.max_y() - self.min_y()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionCandidate {
    pub quad: QuadBox,
    /// Mean probability inside the box before unclipping.
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f32,
    pub character_scores: Vec<f32>,
}

impl RecognitionResult {
    pub fn from_characters(text: String, character_scores: Vec<f32>) -> Self {
        let confidence = if character_scores.is_empty() {
            0.0
        } else {
            character_scores.iter().sum::<f32>() / character_scores.len() as f32
        };
        Self {
            text,
            confidence,
            character_scores,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrResult {
    pub bounds: DetectionCandidate,
    pub text: RecognitionResult,
}

/// Recognized boxes sharing one visual line.
#[derive(Debug, Clone)]
pub struct TextLine {
    /// Member boxes, left to right.
    pub boxes: Vec<QuadBox>,
    pub text: String,
    pub confidence: f32,
    pub bounding_box: QuadBox,
}

#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    /// Per-box results in reading order.
    pub results: Vec<OcrResult>,
    pub lines: Vec<TextLine>,
}
