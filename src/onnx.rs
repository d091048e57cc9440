//! ONNX Runtime implementations of the model traits for PaddleOCR-style
//! detection, orientation and recognition networks.

use std::path::PathBuf;

use image::{imageops::FilterType, RgbImage};
use ndarray::{Array2, Array3, ArrayD, ArrayViewD, Axis};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    error::{OcrError, Result},
    model::{AngleClassifier, TextDetector, TextRecognizer},
    util::Scale,
    Angle,
};

const DET_MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const DET_NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

const CLS_WIDTH: u32 = 192;
const CLS_HEIGHT: u32 = 48;
const REC_HEIGHT: u32 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

pub const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

fn dispatch(provider: &ExecutionProvider) -> Option<ExecutionProviderDispatch> {
    match provider {
        ExecutionProvider::Default => None,
        #[cfg(feature = "tensorrt")]
        ExecutionProvider::TensorRT => Some(ort::TensorRTExecutionProvider::default().build()),
        #[cfg(feature = "coreml")]
        ExecutionProvider::CoreML => Some(ort::CoreMLExecutionProvider::default().build()),
        #[cfg(feature = "cuda")]
        ExecutionProvider::Cuda => Some(ort::CUDAExecutionProvider::default().build()),
        #[cfg(feature = "directml")]
        ExecutionProvider::DirectML => Some(ort::DirectMLExecutionProvider::default().build()),
    }
}

#[instrument(level = "debug", skip(execution_providers))]
fn build_session(
    path: PathBuf,
    num_threads: usize,
    execution_providers: &[ExecutionProvider],
) -> Result<Session> {
    #[cfg(feature = "directml")]
    let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
    #[cfg(not(feature = "directml"))]
    let parallel = true;

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_memory_pattern(parallel)?
        .with_parallel_execution(parallel)?
        .with_inter_threads(num_threads)?
        .with_intra_threads(num_threads)?
        .with_execution_providers(execution_providers.iter().filter_map(dispatch))?
        .commit_from_file(path)?;

    log::debug!("Session inputs: {:?}", session.inputs);
    log::debug!("Session outputs: {:?}", session.outputs);
    Ok(session)
}

/// `(pixel - mean) * norm` per channel, laid out as `[channel, y, x]`.
fn subtract_mean_normalize(image: &RgbImage, mean_vals: &[f32; 3], norm_vals: &[f32; 3]) -> Array3<f32> {
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| {
            let value = image.get_pixel(x as u32, y as u32)[ch] as f32 / 255.0;
            (value - mean_vals[ch]) * norm_vals[ch]
        },
    )
}

fn run_single(session: &Session, input: Array3<f32>) -> Result<ArrayD<f32>> {
    let outputs = session.run(inputs!["x" => input.insert_axis(Axis(0))]?)?;
    let (_, output) = outputs
        .first_key_value()
        .ok_or_else(|| OcrError::Model("model produced no outputs".to_string()))?;
    let tensor: ArrayViewD<f32> = output.try_extract_tensor::<f32>()?;
    Ok(tensor.to_owned())
}

fn into_matrix(output: ArrayD<f32>, stage: &'static str) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    let rows = shape.iter().rev().nth(1).copied().unwrap_or(0);
    let cols = shape.last().copied().unwrap_or(0);
    if shape.len() < 2 || shape[..shape.len() - 2].iter().any(|&len| len != 1) {
        return Err(OcrError::ShapeMismatch {
            stage,
            expected: vec![1, rows, cols],
            actual: shape,
        });
    }
    output
        .into_shape((rows, cols))
        .map_err(|err| OcrError::Model(err.to_string()))
}

pub struct OnnxDetector {
    session: Session,
}

impl OnnxDetector {
    pub fn init(
        path: impl Into<PathBuf>,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
    ) -> Result<Self> {
        Ok(Self {
            session: build_session(path.into(), num_threads, execution_providers)?,
        })
    }
}

impl TextDetector for OnnxDetector {
    #[instrument(level = "debug", skip(self, image))]
    fn predict(&self, image: &RgbImage, scale: &Scale) -> Result<Array2<f32>> {
        let image = image::imageops::resize(
            image,
            scale.target_width,
            scale.target_height,
            FilterType::Nearest,
        );
        let input = subtract_mean_normalize(&image, &DET_MEAN_VALUES, &DET_NORM_VALUES);
        into_matrix(run_single(&self.session, input)?, "detection output")
    }
}

pub struct OnnxAngleClassifier {
    session: Session,
}

impl OnnxAngleClassifier {
    pub fn init(path: impl Into<PathBuf>, num_threads: usize) -> Result<Self> {
        Ok(Self {
            session: build_session(path.into(), num_threads, &[ExecutionProvider::Default])?,
        })
    }
}

impl AngleClassifier for OnnxAngleClassifier {
    #[instrument(level = "trace", skip(self, crop))]
    fn classify(&self, crop: &RgbImage) -> Result<Angle> {
        let crop = image::imageops::resize(crop, CLS_WIDTH, CLS_HEIGHT, FilterType::Nearest);
        let input = subtract_mean_normalize(&crop, &MEAN_VALUES, &NORM_VALUES);
        let output = into_matrix(run_single(&self.session, input)?, "classifier output")?;
        Angle::from_scores(output.row(0))
            .ok_or_else(|| OcrError::Model("classifier produced no classes".to_string()))
    }
}

pub struct OnnxRecognizer {
    session: Session,
}

impl OnnxRecognizer {
    pub fn init(
        path: impl Into<PathBuf>,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
    ) -> Result<Self> {
        Ok(Self {
            session: build_session(path.into(), num_threads, execution_providers)?,
        })
    }
}

impl TextRecognizer for OnnxRecognizer {
    #[instrument(level = "trace", skip(self, crop))]
    fn predict(&self, crop: &RgbImage) -> Result<Array2<f32>> {
        let scale = REC_HEIGHT as f32 / crop.height().max(1) as f32;
        let dest_width = ((crop.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let crop = image::imageops::resize(crop, dest_width, REC_HEIGHT, FilterType::Nearest);
        let input = subtract_mean_normalize(&crop, &MEAN_VALUES, &NORM_VALUES);
        let output = into_matrix(run_single(&self.session, input)?, "recognition output")?;
        log::trace!("Recognition output size: {:?}", output.dim());
        Ok(output)
    }
}
