//! Boundary to the neural networks. Implementations run inference only; all
//! geometry and decoding happens in this crate.

use image::RgbImage;
use ndarray::Array2;

use crate::{angle::Angle, error::Result, util::Scale};

/// Produces a per-pixel text probability map of
/// `scale.target_height x scale.target_width`.
pub trait TextDetector: Send + Sync {
    fn predict(&self, image: &RgbImage, scale: &Scale) -> Result<Array2<f32>>;
}

/// Classifies whether a crop is upright or upside down.
pub trait AngleClassifier: Send + Sync {
    fn classify(&self, crop: &RgbImage) -> Result<Angle>;
}

/// Produces a `T x V` matrix of class probabilities for one crop.
pub trait TextRecognizer: Send + Sync {
    fn predict(&self, crop: &RgbImage) -> Result<Array2<f32>>;
}
