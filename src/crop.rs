use geo::Coord;
use image::{imageops, Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tracing::instrument;

use crate::{
    error::{OcrError, Result},
    QuadBox,
};

/// Crops taller than this multiple of their width are turned on their side.
const ROTATE_ASPECT: f32 = 1.5;

fn distance(a: Coord<f32>, b: Coord<f32>) -> f32 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Planar homography taking each `from` point onto the matching `to` point.
pub fn homography(from: &[Coord<f32>; 4], to: &[Coord<f32>; 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (p, q)) in from.iter().zip(to).enumerate() {
        let (x, y) = (p.x as f64, p.y as f64);
        let (u, v) = (q.x as f64, q.y as f64);
        let row = 2 * i;
        a.row_mut(row)
            .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
        a.row_mut(row + 1)
            .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
        b[row] = u;
        b[row + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    Some(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0))
}

/// Bilinear sample with edge pixels replicated outward.
fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let (x0, y0) = (x.floor(), y.floor());
    let (x1, y1) = ((x0 + 1.0).min(max_x), (y0 + 1.0).min(max_y));
    let (fx, fy) = (x - x0, y - y0);

    let p00 = image.get_pixel(x0 as u32, y0 as u32);
    let p10 = image.get_pixel(x1 as u32, y0 as u32);
    let p01 = image.get_pixel(x0 as u32, y1 as u32);
    let p11 = image.get_pixel(x1 as u32, y1 as u32);

    let mut out = [0u8; 3];
    for (ch, value) in out.iter_mut().enumerate() {
        let top = p00[ch] as f64 * (1.0 - fx) + p10[ch] as f64 * fx;
        let bottom = p01[ch] as f64 * (1.0 - fx) + p11[ch] as f64 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Extracts the region under `quad` as an upright rectangle.
///
/// Output width is the longer of the top and bottom edges, height the longer
/// of the left and right edges. Tall results are rotated 90° counter-clockwise
/// so text lines come out wide.
#[instrument(level = "trace", skip(image))]
pub fn perspective_crop(image: &RgbImage, quad: &QuadBox) -> Result<RgbImage> {
    if image.width() == 0 || image.height() == 0 {
        return Err(OcrError::DegenerateCrop);
    }
    let [p0, p1, p2, p3] = quad.points;
    let width = distance(p0, p1).max(distance(p2, p3)).round() as u32;
    let height = distance(p0, p3).max(distance(p1, p2)).round() as u32;
    if width == 0 || height == 0 {
        return Err(OcrError::DegenerateCrop);
    }

    let (w, h) = (width as f32, height as f32);
    let target = [
        Coord { x: 0.0, y: 0.0 },
        Coord { x: w, y: 0.0 },
        Coord { x: w, y: h },
        Coord { x: 0.0, y: h },
    ];
    // Inverse mapping: destination pixel to source position.
    let inverse = homography(&target, &quad.points).ok_or(OcrError::DegenerateCrop)?;

    let crop = RgbImage::from_fn(width, height, |x, y| {
        let mapped = inverse * Vector3::new(x as f64, y as f64, 1.0);
        if mapped.z.abs() < f64::EPSILON {
            return sample_bilinear(image, 0.0, 0.0);
        }
        sample_bilinear(image, mapped.x / mapped.z, mapped.y / mapped.z)
    });

    if h > w * ROTATE_ASPECT {
        log::trace!("Rotating {width}x{height} crop");
        Ok(imageops::rotate270(&crop))
    } else {
        Ok(crop)
    }
}
