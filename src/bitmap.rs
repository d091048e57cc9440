//! Thresholding of the detector's probability map and connected-component
//! extraction over the resulting mask.

use geo::Coord;
use image::{GrayImage, ImageBuffer};
use imageproc::{distance_transform::Norm, morphology::dilate_mut};
use ndarray::{Array2, ArrayView2, Axis};
use tracing::instrument;

/// Boolean foreground mask indexed `[y, x]`.
pub type BinaryMask = Array2<bool>;

/// Vertical growth is never capped below this many pixels, so short maps
/// still yield whole regions.
const MIN_SPAN_PX: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Four,
    Eight,
}

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(1, 0), (-1, 0), (0, 1), (0, -1)],
            Connectivity::Eight => &[
                (1, 0),
                (-1, 0),
                (0, 1),
                (0, -1),
                (1, 1),
                (1, -1),
                (-1, 1),
                (-1, -1),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComponentOptions {
    pub connectivity: Connectivity,
    pub min_pixels: usize,
    /// Fraction of the mask height a component may extend above or below its
    /// seed row. `None` disables the cap.
    pub max_span_ratio: Option<f32>,
}

impl Default for ComponentOptions {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Four,
            min_pixels: 1,
            max_span_ratio: None,
        }
    }
}

/// A connected set of foreground pixels, stored as `(x, y)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub pixels: Vec<(usize, usize)>,
}

impl Component {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Leftmost and rightmost pixel of every row. The convex hull of these
    /// equals the hull of the whole component.
    pub fn hull_candidates(&self) -> Vec<Coord<f32>> {
        let mut rows: Vec<(usize, usize, usize)> = Vec::new();
        let mut sorted = self.pixels.clone();
        sorted.sort_unstable_by_key(|&(x, y)| (y, x));
        for (x, y) in sorted {
            match rows.last_mut() {
                Some((row, _, max_x)) if *row == y => *max_x = x,
                _ => rows.push((y, x, x)),
            }
        }
        rows.into_iter()
            .flat_map(|(y, min_x, max_x)| {
                let left = Coord {
                    x: min_x as f32,
                    y: y as f32,
                };
                let right = Coord {
                    x: max_x as f32,
                    y: y as f32,
                };
                if min_x == max_x {
                    vec![left]
                } else {
                    vec![left, right]
                }
            })
            .collect()
    }
}

/// Cell is foreground iff its probability is strictly above `threshold`.
pub fn binarize(pred: ArrayView2<f32>, threshold: f32) -> BinaryMask {
    pred.mapv(|p| p > threshold)
}

pub(crate) fn to_luma_image(mask: &BinaryMask) -> GrayImage {
    let height = mask.len_of(Axis(0));
    let width = mask.len_of(Axis(1));
    ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        image::Luma([if mask[[y as usize, x as usize]] { 255u8 } else { 0 }])
    })
}

/// Grows the mask by one pixel in every direction (3x3 square kernel).
#[instrument(level = "trace", skip(mask))]
pub fn dilate(mask: &BinaryMask) -> BinaryMask {
    let mut image = to_luma_image(mask);
    dilate_mut(&mut image, Norm::LInf, 1);
    Array2::from_shape_fn(mask.dim(), |(y, x)| image.get_pixel(x as u32, y as u32)[0] > 0)
}

/// Iterative flood fill over unvisited foreground cells, in row-major seed order.
#[instrument(level = "trace", skip(mask))]
pub fn extract_components(mask: &BinaryMask, options: ComponentOptions) -> Vec<Component> {
    let (height, width) = mask.dim();
    let max_span = options
        .max_span_ratio
        .map(|ratio| (ratio * height as f32).max(MIN_SPAN_PX));

    let mut visited = Array2::<bool>::from_elem((height, width), false);
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for ((seed_y, seed_x), &on) in mask.indexed_iter() {
        if !on || visited[[seed_y, seed_x]] {
            continue;
        }
        visited[[seed_y, seed_x]] = true;
        stack.push((seed_x, seed_y));
        let mut pixels = Vec::new();

        while let Some((x, y)) = stack.pop() {
            pixels.push((x, y));
            for &(dx, dy) in options.connectivity.offsets() {
                let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy))
                else {
                    continue;
                };
                if nx >= width || ny >= height || visited[[ny, nx]] || !mask[[ny, nx]] {
                    continue;
                }
                if let Some(max_span) = max_span {
                    if (ny as f32 - seed_y as f32).abs() > max_span {
                        // Left unvisited so it can seed its own component.
                        continue;
                    }
                }
                visited[[ny, nx]] = true;
                stack.push((nx, ny));
            }
        }

        if pixels.len() >= options.min_pixels {
            components.push(Component { pixels });
        } else {
            log::trace!("Dropping component of {} pixels", pixels.len());
        }
    }

    log::debug!("Found {} components in {width}x{height} mask", components.len());
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn all_zero_map_has_no_components() {
        let pred = Array2::<f32>::zeros((16, 16));
        for threshold in [0.01, 0.3, 0.9] {
            let mask = binarize(pred.view(), threshold);
            assert!(mask.iter().all(|on| !on));
            assert!(extract_components(&mask, ComponentOptions::default()).is_empty());
        }
    }

    #[test]
    fn threshold_is_strict() {
        let pred = array![[0.3, 0.31], [0.29, 1.0]];
        let mask = binarize(pred.view(), 0.3);
        assert_eq!(mask, array![[false, true], [false, true]]);
    }

    #[test]
    fn diagonal_pixels_depend_on_connectivity() {
        let mask = array![[true, false], [false, true]];
        let four = extract_components(&mask, ComponentOptions::default());
        assert_eq!(four.len(), 2);

        let eight = extract_components(
            &mask,
            ComponentOptions {
                connectivity: Connectivity::Eight,
                ..Default::default()
            },
        );
        assert_eq!(eight.len(), 1);
        assert_eq!(eight[0].len(), 2);
    }

    #[test]
    fn small_components_are_dropped() {
        let mask = array![
            [true, true, false, false],
            [false, false, false, true],
            [true, true, true, false],
        ];
        let components = extract_components(
            &mask,
            ComponentOptions {
                min_pixels: 2,
                ..Default::default()
            },
        );
        let sizes: Vec<_> = components.iter().map(Component::len).collect();
        assert_eq!(sizes, vec![2, 3]);
    }

    #[test]
    fn vertical_span_is_capped() {
        let mask = Array2::from_elem((40, 2), true);
        let components = extract_components(
            &mask,
            ComponentOptions {
                max_span_ratio: Some(0.25),
                ..Default::default()
            },
        );
        // Cap is 10 rows either side of the seed, so a 40-row column splits.
        assert!(components.len() > 1);
        assert_eq!(components.iter().map(Component::len).sum::<usize>(), 80);
        for component in &components {
            let min_y = component.pixels.iter().map(|p| p.1).min().unwrap();
            let max_y = component.pixels.iter().map(|p| p.1).max().unwrap();
            assert!(max_y - min_y <= 10);
        }
    }

    #[test]
    fn dilation_grows_by_one_pixel() {
        let mut mask = Array2::from_elem((5, 5), false);
        mask[[2, 2]] = true;
        let dilated = dilate(&mask);
        assert_eq!(dilated.iter().filter(|on| **on).count(), 9);
        assert!(dilated[[1, 1]] && dilated[[3, 3]]);
        assert!(!dilated[[0, 0]]);
    }

    #[test]
    fn hull_candidates_keep_row_extremes() {
        let component = Component {
            pixels: vec![(0, 0), (1, 0), (2, 0), (1, 1)],
        };
        let candidates = component.hull_candidates();
        assert_eq!(
            candidates,
            vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 2.0, y: 0.0 },
                Coord { x: 1.0, y: 1.0 }
            ]
        );
    }
}
