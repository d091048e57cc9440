//! Turns the detector's probability map into scored quad boxes in source
//! image coordinates.

use geo::Coord;
use ndarray::{Array2, ArrayView2};
use tracing::instrument;

use crate::{
    bitmap::{binarize, dilate, extract_components, ComponentOptions},
    error::{OcrError, Result},
    geometry::{min_area_rect, on_boundary, point_in_polygon, scanline_crossings, unclip},
    options::{BoxType, OcrOptions},
    util::Scale,
    DetectionCandidate, QuadBox,
};

/// Components with fewer pixels cannot describe an area.
const MIN_COMPONENT_PIXELS: usize = 3;

/// Extra short-side margin required after unclipping.
const UNCLIP_SIZE_MARGIN: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreMode {
    /// Point-in-polygon test over the polygon's bounding box.
    #[default]
    Fast,
    /// Rasterizes the polygon into a mask first.
    Slow,
}

#[derive(Debug, Clone, Copy)]
pub struct DbPostProcess {
    pub threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    pub min_size: f32,
    pub max_candidates: usize,
    pub use_dilation: bool,
    pub score_mode: ScoreMode,
    pub box_type: BoxType,
    pub components: ComponentOptions,
}

impl From<&OcrOptions> for DbPostProcess {
    fn from(options: &OcrOptions) -> Self {
        Self {
            threshold: options.threshold,
            box_threshold: options.box_threshold,
            unclip_ratio: options.unclip_ratio,
            min_size: options.min_size,
            max_candidates: options.max_candidates,
            use_dilation: options.use_dilation,
            score_mode: options.score_mode,
            box_type: options.box_type,
            components: ComponentOptions {
                connectivity: options.connectivity,
                min_pixels: MIN_COMPONENT_PIXELS,
                max_span_ratio: options.max_span_ratio,
            },
        }
    }
}

impl Default for DbPostProcess {
    fn default() -> Self {
        Self::from(&OcrOptions::default())
    }
}

impl DbPostProcess {
    /// Runs binarization through rescaling. Boxes come back in component
    /// discovery order; reading order is applied by the caller.
    #[instrument(level = "debug", skip(self, pred))]
    pub fn boxes_from_probability_map(
        &self,
        pred: ArrayView2<f32>,
        scale: &Scale,
    ) -> Result<Vec<DetectionCandidate>> {
        if self.box_type == BoxType::Poly {
            return Err(OcrError::UnsupportedBoxType);
        }
        let expected = [scale.target_height as usize, scale.target_width as usize];
        if pred.shape() != expected {
            return Err(OcrError::ShapeMismatch {
                stage: "probability map",
                expected: expected.to_vec(),
                actual: pred.shape().to_vec(),
            });
        }

        let mut mask = binarize(pred, self.threshold);
        if self.use_dilation {
            mask = dilate(&mask);
        }

        let boxes = extract_components(&mask, self.components)
            .into_iter()
            .take(self.max_candidates)
            .filter_map(|component| min_area_rect(&component.hull_candidates()))
            .filter(|rect| rect.short_side() >= self.min_size)
            .map(|rect| {
                let score = match self.score_mode {
                    ScoreMode::Fast => box_score_fast(pred, &rect.corners),
                    ScoreMode::Slow => box_score_slow(pred, &rect.corners),
                };
                (rect, score)
            })
            .filter(|(_, score)| {
                let keep = *score >= self.box_threshold;
                if !keep {
                    log::trace!("Dropping box with score {score}");
                }
                keep
            })
            .filter_map(|(rect, score)| {
                Some((min_area_rect(&unclip(&rect.corners, self.unclip_ratio))?, score))
            })
            .filter(|(rect, _)| rect.short_side() >= self.min_size + UNCLIP_SIZE_MARGIN)
            .map(|(rect, score)| DetectionCandidate {
                quad: rescale_box(&QuadBox::new(rect.corners), scale),
                score,
            })
            .collect::<Vec<_>>();

        log::debug!("Kept {} text boxes", boxes.len());
        Ok(boxes)
    }
}

/// Inclusive pixel bounds of the polygon, clamped to the map.
fn clamped_bounds(pred: &ArrayView2<f32>, polygon: &[Coord<f32>]) -> Option<[usize; 4]> {
    let (height, width) = pred.dim();
    if height == 0 || width == 0 || polygon.is_empty() {
        return None;
    }
    let clamp = |value: f32, len: usize| value.max(0.0).min((len - 1) as f32) as usize;
    let min_x = polygon.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = polygon.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = polygon.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = polygon.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    Some([
        clamp(min_x.floor(), width),
        clamp(max_x.ceil(), width),
        clamp(min_y.floor(), height),
        clamp(max_y.ceil(), height),
    ])
}

fn mean_where(pred: &ArrayView2<f32>, bounds: [usize; 4], inside: impl Fn(usize, usize) -> bool) -> f32 {
    let [min_x, max_x, min_y, max_y] = bounds;
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if inside(x, y) {
                sum += pred[[y, x]] as f64;
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Mean probability of the pixels inside `polygon`, edges included.
pub fn box_score_fast(pred: ArrayView2<f32>, polygon: &[Coord<f32>]) -> f32 {
    let Some(bounds) = clamped_bounds(&pred, polygon) else {
        return 0.0;
    };
    mean_where(&pred, bounds, |x, y| {
        point_in_polygon(
            Coord {
                x: x as f32,
                y: y as f32,
            },
            polygon,
        )
    })
}

/// Same value as [`box_score_fast`], computed by filling a mask row by row
/// and then tracing the outline.
pub fn box_score_slow(pred: ArrayView2<f32>, polygon: &[Coord<f32>]) -> f32 {
    let Some(bounds) = clamped_bounds(&pred, polygon) else {
        return 0.0;
    };
    let [min_x, max_x, min_y, max_y] = bounds;
    let mut mask = Array2::from_elem((max_y - min_y + 1, max_x - min_x + 1), false);

    for y in min_y..=max_y {
        let crossings = scanline_crossings(y as f32, polygon);
        for x in min_x..=max_x {
            let right = crossings.iter().filter(|&&cx| (x as f32) < cx).count();
            if right % 2 == 1 {
                mask[[y - min_y, x - min_x]] = true;
            }
        }
    }

    let n = polygon.len();
    for i in 0..n {
        let (a, b) = (polygon[i], polygon[(i + 1) % n]);
        let edge = [a, b];
        let Some([ex0, ex1, ey0, ey1]) = clamped_bounds(&pred, &edge) else {
            continue;
        };
        for y in ey0.max(min_y)..=ey1.min(max_y) {
            for x in ex0.max(min_x)..=ex1.min(max_x) {
                let p = Coord {
                    x: x as f32,
                    y: y as f32,
                };
                if on_boundary(p, &edge) {
                    mask[[y - min_y, x - min_x]] = true;
                }
            }
        }
    }

    mean_where(&pred, bounds, |x, y| mask[[y - min_y, x - min_x]])
}

/// Maps a box from probability-map space back to source pixels, rounding and
/// clamping into the image.
pub fn rescale_box(quad: &QuadBox, scale: &Scale) -> QuadBox {
    let max_x = scale.src_width.saturating_sub(1) as f32;
    let max_y = scale.src_height.saturating_sub(1) as f32;
    QuadBox::new(quad.points.map(|p| Coord {
        x: (p.x / scale.ratio_w).round().clamp(0.0, max_x),
        y: (p.y / scale.ratio_h).round().clamp(0.0, max_y),
    }))
}
