use image::{imageops, DynamicImage, RgbImage};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

pub mod angle;
pub mod bitmap;
pub mod crop;
pub mod ctc;
pub mod dbnet;
pub mod dict;
mod error;
pub mod geometry;
pub mod merge;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
mod options;
mod result;
pub mod sorting;
pub mod util;

pub use angle::Angle;
pub use ctc::{CtcDecoder, DecodeMethod};
pub use dbnet::{DbPostProcess, ScoreMode};
pub use dict::{BlankPosition, CharDictionary};
pub use error::{OcrError, Result};
pub use model::{AngleClassifier, TextDetector, TextRecognizer};
pub use options::*;
pub use result::*;

#[cfg(feature = "onnx")]
pub use ort as runtime;

use crate::{
    angle::apply_most_angle, crop::perspective_crop, merge::merge_text_lines,
    sorting::sort_reading_order, util::scale_normalized,
};

const DEFAULT_MAX_SIDE_LEN: u32 = 960;

pub struct TextSiftBuilder {
    threads: usize,
    max_side_len: u32,
    detector: Option<Box<dyn TextDetector>>,
    classifier: Option<Box<dyn AngleClassifier>>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    dictionary: Option<CharDictionary>,
}

impl TextSiftBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the pool that runs per-box work.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn detector(mut self, detector: impl TextDetector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn classifier(mut self, classifier: impl AngleClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    pub fn recognizer(mut self, recognizer: impl TextRecognizer + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn dictionary(mut self, dictionary: CharDictionary) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Result<TextSift> {
        let missing = |what: &str| OcrError::InvalidConfig(format!("no {what} configured"));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("textsift-{index}"))
            .build()
            .map_err(|err| OcrError::InvalidConfig(err.to_string()))?;

        Ok(TextSift {
            detector: self.detector.ok_or_else(|| missing("detector"))?,
            classifier: self.classifier,
            recognizer: self.recognizer.ok_or_else(|| missing("recognizer"))?,
            decoder: CtcDecoder::new(self.dictionary.ok_or_else(|| missing("dictionary"))?),
            max_side_len: self.max_side_len,
            pool,
        })
    }
}

impl Default for TextSiftBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            max_side_len: DEFAULT_MAX_SIDE_LEN,
            detector: None,
            classifier: None,
            recognizer: None,
            dictionary: None,
        }
    }
}

pub struct TextSift {
    detector: Box<dyn TextDetector>,
    classifier: Option<Box<dyn AngleClassifier>>,
    recognizer: Box<dyn TextRecognizer>,
    decoder: CtcDecoder,
    max_side_len: u32,
    pool: rayon::ThreadPool,
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(OcrError::Cancelled)
    } else {
        Ok(())
    }
}

/// Applies the failure policy to one box's outcome. Cancellation and input
/// errors always propagate.
fn isolate<T>(index: usize, result: Result<T>, policy: FailurePolicy) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err @ OcrError::Cancelled) => Err(err),
        Err(err) if err.is_input_error() || policy == FailurePolicy::Abort => Err(err),
        Err(err) => {
            log::warn!("Skipping box {index}: {err}");
            Ok(None)
        }
    }
}

impl TextSift {
    #[instrument(skip(self, image, cancel))]
    pub fn detect(
        &self,
        image: &DynamicImage,
        options: OcrOptions,
        cancel: &CancellationToken,
    ) -> Result<OcrOutput> {
        options.validate()?;
        check_cancelled(cancel)?;

        let max_side_len = if options.max_side_len != 0 {
            options.max_side_len
        } else {
            self.max_side_len
        };
        let scale = scale_normalized(image, max_side_len);
        let image = image.to_rgb8();

        let pred = self.detector.predict(&image, &scale)?;
        let boxes = DbPostProcess::from(&options).boxes_from_probability_map(pred.view(), &scale)?;
        let boxes = sort_reading_order(boxes, |candidate| &candidate.quad);

        // Detection is complete before any recognition starts.
        check_cancelled(cancel)?;

        let results = self
            .recognize_boxes(&image, boxes, &options, cancel)?
            .into_iter()
            .filter(|result| {
                let keep = result.text.confidence >= options.drop_score;
                if !keep {
                    log::trace!(
                        "Dropping {:?} with confidence {}",
                        result.text.text,
                        result.text.confidence
                    );
                }
                keep
            })
            .collect::<Vec<_>>();

        let merge_input = results
            .iter()
            .map(|result| (result.text.clone(), result.bounds.quad))
            .collect::<Vec<_>>();
        let lines = merge_text_lines(&merge_input, options.line_gap_threshold);

        Ok(OcrOutput { results, lines })
    }

    /// Crops, orients, recognizes and decodes every box. Output keeps the
    /// order of `boxes`; boxes skipped under [`FailurePolicy::Skip`] are absent.
    #[instrument(level = "debug", skip_all, fields(boxes = boxes.len()))]
    pub fn recognize_boxes(
        &self,
        image: &RgbImage,
        boxes: Vec<DetectionCandidate>,
        options: &OcrOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<OcrResult>> {
        let policy = options.failure_policy;
        let classifier = self
            .classifier
            .as_deref()
            .filter(|_| options.use_angle_cls);

        let crops = self.pool.install(|| {
            boxes
                .par_iter()
                .enumerate()
                .map(|(index, candidate)| {
                    check_cancelled(cancel)?;
                    let outcome = perspective_crop(image, &candidate.quad).and_then(|crop| {
                        let angle = classifier.map(|it| it.classify(&crop)).transpose()?;
                        Ok((crop, angle))
                    });
                    isolate(index, outcome, policy)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut angles = crops
            .iter()
            .flatten()
            .filter_map(|(_, angle)| *angle)
            .collect::<Vec<_>>();
        if options.most_angle {
            apply_most_angle(&mut angles);
        }
        let mut angles = angles.into_iter();
        let crops = crops
            .into_iter()
            .map(|slot| {
                slot.map(|(crop, angle)| match angle.and_then(|_| angles.next()) {
                    Some(angle) if angle.is_upside_down(options.cls_threshold) => {
                        imageops::rotate180(&crop)
                    }
                    _ => crop,
                })
            })
            .collect::<Vec<_>>();

        #[cfg(feature = "debug")]
        for (i, crop) in crops.iter().enumerate() {
            if let Some(crop) = crop {
                if let Err(err) = crop.save(format!("part_images/{i}.png")) {
                    log::warn!("Failed to save crop {i}: {err}");
                }
            }
        }

        check_cancelled(cancel)?;

        let mut recognized = self.pool.install(|| {
            crops
                .par_iter()
                .enumerate()
                .filter_map(|(index, crop)| crop.as_ref().map(|crop| (index, crop)))
                .map(|(index, crop)| {
                    check_cancelled(cancel)?;
                    let outcome = self.recognize(crop, options.decode_method);
                    Ok(isolate(index, outcome, policy)?.map(|text| (index, text)))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        // Parallel completion order is not reading order.
        recognized.sort_by_key(|entry| entry.as_ref().map(|(index, _)| *index));

        Ok(recognized
            .into_iter()
            .flatten()
            .map(|(index, text)| OcrResult {
                bounds: boxes[index],
                text,
            })
            .collect())
    }

    /// Recognizes already-cropped text lines, keeping their order.
    #[instrument(level = "debug", skip_all, fields(crops = crops.len()))]
    pub fn recognize_crops(
        &self,
        crops: &[RgbImage],
        method: DecodeMethod,
    ) -> Result<Vec<RecognitionResult>> {
        self.pool.install(|| {
            crops
                .par_iter()
                .map(|crop| self.recognize(crop, method))
                .collect()
        })
    }

    fn recognize(&self, crop: &RgbImage, method: DecodeMethod) -> Result<RecognitionResult> {
        let scores = self.recognizer.predict(crop)?;
        self.decoder.decode(scores.view(), method)
    }
}
