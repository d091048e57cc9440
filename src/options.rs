use crate::{
    bitmap::Connectivity,
    ctc::DecodeMethod,
    dbnet::ScoreMode,
    error::{OcrError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxType {
    #[default]
    Quad,
    Poly,
}

/// What to do when a single box fails to crop, classify or recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Skip,
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub struct OcrOptions {
    /// Longest side of the detector input. 0 uses the engine default.
    pub max_side_len: u32,
    /// Binarization threshold on the probability map.
    pub threshold: f32,
    /// Minimum mean probability for a box to be kept.
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    /// Minimum short side of a fitted box, in probability-map pixels.
    pub min_size: f32,
    pub max_candidates: usize,
    pub connectivity: Connectivity,
    /// Caps vertical growth of a component at this fraction of the map height.
    pub max_span_ratio: Option<f32>,
    pub box_type: BoxType,
    pub use_dilation: bool,
    pub score_mode: ScoreMode,
    pub decode_method: DecodeMethod,
    /// Consecutive boxes join a line while their top edges differ by at most
    /// this fraction of the average box height.
    pub line_gap_threshold: f32,
    pub drop_score: f32,
    pub use_angle_cls: bool,
    pub most_angle: bool,
    pub cls_threshold: f32,
    pub failure_policy: FailurePolicy,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            max_side_len: 0,
            threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_size: 3.0,
            max_candidates: 1000,
            connectivity: Connectivity::Four,
            max_span_ratio: Some(0.25),
            box_type: BoxType::Quad,
            use_dilation: false,
            score_mode: ScoreMode::Fast,
            decode_method: DecodeMethod::Greedy,
            line_gap_threshold: 0.5,
            drop_score: 0.5,
            use_angle_cls: true,
            most_angle: true,
            cls_threshold: 0.9,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

impl OcrOptions {
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("threshold", self.threshold),
            ("box_threshold", self.box_threshold),
            ("drop_score", self.drop_score),
            ("cls_threshold", self.cls_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(OcrError::InvalidConfig(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        if !self.unclip_ratio.is_finite() || self.unclip_ratio < 0.0 {
            return Err(OcrError::InvalidConfig(format!(
                "unclip_ratio must be a non-negative number, got {}",
                self.unclip_ratio
            )));
        }
        if !self.min_size.is_finite() || self.min_size < 0.0 {
            return Err(OcrError::InvalidConfig(format!(
                "min_size must be a non-negative number, got {}",
                self.min_size
            )));
        }
        if !self.line_gap_threshold.is_finite() || self.line_gap_threshold < 0.0 {
            return Err(OcrError::InvalidConfig(format!(
                "line_gap_threshold must be a non-negative number, got {}",
                self.line_gap_threshold
            )));
        }
        if let Some(ratio) = self.max_span_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(OcrError::InvalidConfig(format!(
                    "max_span_ratio must be positive, got {ratio}"
                )));
            }
        }
        if let DecodeMethod::BeamSearch { width: 0 } = self.decode_method {
            return Err(OcrError::InvalidConfig(
                "beam width must be at least 1".to_string(),
            ));
        }
        if self.box_type == BoxType::Poly {
            return Err(OcrError::UnsupportedBoxType);
        }
        Ok(())
    }
}
