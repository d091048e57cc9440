use image::DynamicImage;

/// Relation between the source image and the detector's input grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub src_width: u32,
    pub src_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    /// `target_width / src_width`.
    pub ratio_w: f32,
    /// `target_height / src_height`.
    pub ratio_h: f32,
}

impl Scale {
    pub fn new(src_width: u32, src_height: u32, target_width: u32, target_height: u32) -> Self {
        Self {
            src_width,
            src_height,
            target_width,
            target_height,
            ratio_w: target_width as f32 / src_width.max(1) as f32,
            ratio_h: target_height as f32 / src_height.max(1) as f32,
        }
    }

    /// No resizing: the probability map has the source image's dimensions.
    pub fn identity(width: u32, height: u32) -> Self {
        Self::new(width, height, width, height)
    }
}

/// Fits the image into `target_size` on its longest side, flooring both
/// sides to a multiple of 32 as the detector requires.
pub fn scale_normalized(image: &DynamicImage, target_size: u32) -> Scale {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let aspect_ratio = width as f32 / height as f32;
    let (mut target_width, mut target_height) = if aspect_ratio >= 1.0 {
        let target_width = width.min(target_size);
        let target_height = (target_width as f32 / aspect_ratio) as u32;
        (target_width, target_height)
    } else {
        let target_height = height.min(target_size);
        let target_width = (target_height as f32 * aspect_ratio) as u32;
        (target_width, target_height)
    };
    if target_width % 32 != 0 {
        let new_width = (target_width / 32 * 32).max(32);
        log::debug!(
            "Target width of {target_width} wasn't a multiple of 32, flooring to {new_width}."
        );
        target_width = new_width;
    }
    if target_height % 32 != 0 {
        let new_height = (target_height / 32 * 32).max(32);
        log::debug!(
            "Target height of {target_height} wasn't a multiple of 32, flooring to {new_height}."
        );
        target_height = new_height;
    }
    let scale = Scale::new(width, height, target_width, target_height);
    log::debug!(
        "Resize will change image dimensions from (w: {width}, h: {height}) to (w: {target_width}, h: {target_height}) with ratios ({}, {}).",
        scale.ratio_w,
        scale.ratio_h
    );
    scale
}
