use thiserror::Error;

/// Hard failures of the post-processing pipeline.
///
/// Score and size filtering never produce an error; boxes that fail those
/// checks are dropped silently.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("{stage}: expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("decoded index {index} is out of range for a dictionary of {len} symbols")]
    DictionaryIndex { index: usize, len: usize },

    #[error("a quad box needs exactly 4 points, got {points}")]
    MalformedQuad { points: usize },

    #[error("quad box collapses to an empty or non-invertible crop")]
    DegenerateCrop,

    #[error("box type `poly` is not supported")]
    UnsupportedBoxType,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "onnx")]
    #[error(transparent)]
    Runtime(#[from] ort::Error),
}

impl OcrError {
    /// Errors that signal malformed input rather than a single bad box.
    /// These abort a call even when per-box failures are being skipped.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            OcrError::ShapeMismatch { .. } | OcrError::DictionaryIndex { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
