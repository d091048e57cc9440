use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{s, Array2};
use textsift::{
    util::Scale, Angle, AngleClassifier, CharDictionary, DecodeMethod, FailurePolicy, OcrError,
    OcrOptions, TextDetector, TextRecognizer, TextSift, TextSiftBuilder,
};
use tokio_util::sync::CancellationToken;

const SYMBOLS: [&str; 8] = ["<blank>", "H", "e", "l", "o", "W", "r", "d"];
const SIZE: u32 = 64;
/// Rows above this carry a green channel.
const BAND: u32 = 16;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two text blocks on one line, left one over red pixels, right one over blue.
struct FixedDetector;

impl TextDetector for FixedDetector {
    fn predict(&self, _image: &RgbImage, scale: &Scale) -> textsift::Result<Array2<f32>> {
        let mut pred = Array2::zeros((scale.target_height as usize, scale.target_width as usize));
        pred.slice_mut(s![10..22, 4..28]).fill(0.9);
        pred.slice_mut(s![12..24, 34..60]).fill(0.9);
        Ok(pred)
    }
}

/// Red left half, blue right half, with a green band along the top.
fn test_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let green = if y < BAND { 255 } else { 0 };
        if x < SIZE / 2 {
            Rgb([255, green, 0])
        } else {
            Rgb([0, green, 255])
        }
    }))
}

fn is_red(pixel: &Rgb<u8>) -> bool {
    pixel[0] > pixel[2]
}

fn is_green(pixel: &Rgb<u8>) -> bool {
    pixel[1] > 127
}

/// CTC rows spelling `text`, with a blank between doubled letters.
fn encode(text: &str, peak: f32) -> Array2<f32> {
    let mut indices = Vec::new();
    let mut previous = None;
    for ch in text.chars() {
        let index = SYMBOLS
            .iter()
            .position(|symbol| *symbol == ch.to_string())
            .unwrap();
        if previous == Some(index) {
            indices.push(0);
        }
        indices.push(index);
        previous = Some(index);
    }
    indices.push(0);
    let rest = (1.0 - peak) / (SYMBOLS.len() - 1) as f32;
    Array2::from_shape_fn((indices.len(), SYMBOLS.len()), |(t, v)| {
        if v == indices[t] {
            peak
        } else {
            rest
        }
    })
}

/// Reads "Hello" off red crops and "World" off blue ones.
struct ColorRecognizer {
    world_peak: f32,
    fail_on_blue: bool,
}

impl Default for ColorRecognizer {
    fn default() -> Self {
        Self {
            world_peak: 0.9,
            fail_on_blue: false,
        }
    }
}

impl TextRecognizer for ColorRecognizer {
    fn predict(&self, crop: &RgbImage) -> textsift::Result<Array2<f32>> {
        let center = crop.get_pixel(crop.width() / 2, crop.height() / 2);
        if is_red(center) {
            Ok(encode("Hello", 0.9))
        } else if self.fail_on_blue {
            Err(OcrError::Model("recognizer failed".to_string()))
        } else {
            Ok(encode("World", self.world_peak))
        }
    }
}

/// Reads "H" when the crop's top-left pixel comes from the green band, so
/// upright crops read "H" and flipped ones "W".
struct CornerRecognizer;

impl TextRecognizer for CornerRecognizer {
    fn predict(&self, crop: &RgbImage) -> textsift::Result<Array2<f32>> {
        Ok(encode(if is_green(crop.get_pixel(0, 0)) { "H" } else { "W" }, 0.9))
    }
}

/// Cancels `cancel` from inside detection.
struct CancellingDetector {
    cancel: CancellationToken,
}

impl TextDetector for CancellingDetector {
    fn predict(&self, image: &RgbImage, scale: &Scale) -> textsift::Result<Array2<f32>> {
        self.cancel.cancel();
        FixedDetector.predict(image, scale)
    }
}

/// Counts calls and cancels `cancel` on the first one.
struct CancellingRecognizer {
    cancel: CancellationToken,
    calls: Arc<AtomicUsize>,
}

impl TextRecognizer for CancellingRecognizer {
    fn predict(&self, crop: &RgbImage) -> textsift::Result<Array2<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(encode("Hello", 0.9))
    }
}

struct UpsideDown;

impl AngleClassifier for UpsideDown {
    fn classify(&self, _crop: &RgbImage) -> textsift::Result<Angle> {
        Ok(Angle {
            index: 1,
            score: 0.95,
        })
    }
}

fn engine(recognizer: impl TextRecognizer + 'static) -> TextSift {
    TextSiftBuilder::new()
        .threads(2)
        .detector(FixedDetector)
        .recognizer(recognizer)
        .dictionary(CharDictionary::with_blank_index(SYMBOLS, 0).unwrap())
        .build()
        .expect("Failed to build engine")
}

fn options() -> OcrOptions {
    OcrOptions {
        max_side_len: SIZE,
        ..Default::default()
    }
}

#[test]
fn same_line_words_merge_into_one_line() {
    init_logging();
    let ocr = engine(ColorRecognizer::default());
    let output = ocr
        .detect(&test_image(), options(), &CancellationToken::new())
        .expect("Failed recognition.");

    let texts: Vec<_> = output.results.iter().map(|it| it.text.text.as_str()).collect();
    assert_eq!(texts, vec!["Hello", "World"]);
    assert!(output.results.iter().all(|it| it.bounds.score > 0.89));
    assert!(output.results[0].bounds.quad.min_x() < output.results[1].bounds.quad.min_x());

    assert_eq!(output.lines.len(), 1);
    assert_eq!(output.lines[0].text, "Hello World");
    assert!((output.lines[0].confidence - 0.9).abs() < 1e-5);
    assert_eq!(output.lines[0].boxes.len(), 2);
}

#[test]
fn beam_search_gives_the_same_text() {
    init_logging();
    let ocr = engine(ColorRecognizer::default());
    let output = ocr
        .detect(
            &test_image(),
            OcrOptions {
                decode_method: DecodeMethod::BeamSearch { width: 5 },
                ..options()
            },
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(output.lines[0].text, "Hello World");
}

#[test]
fn low_confidence_results_are_dropped() {
    init_logging();
    let ocr = engine(ColorRecognizer {
        world_peak: 0.3,
        ..Default::default()
    });
    let output = ocr
        .detect(&test_image(), options(), &CancellationToken::new())
        .unwrap();
    assert_eq!(output.results.len(), 1);
    assert_eq!(output.lines[0].text, "Hello");
}

#[test]
fn failing_box_is_skipped_or_aborts() {
    init_logging();
    let ocr = engine(ColorRecognizer {
        fail_on_blue: true,
        ..Default::default()
    });
    let output = ocr
        .detect(&test_image(), options(), &CancellationToken::new())
        .unwrap();
    assert_eq!(output.results.len(), 1);
    assert_eq!(output.results[0].text.text, "Hello");

    let aborted = ocr.detect(
        &test_image(),
        OcrOptions {
            failure_policy: FailurePolicy::Abort,
            ..options()
        },
        &CancellationToken::new(),
    );
    assert!(matches!(aborted, Err(OcrError::Model(_))));
}

#[test]
fn cancelled_token_stops_the_call() {
    init_logging();
    let ocr = engine(ColorRecognizer::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        ocr.detect(&test_image(), options(), &cancel),
        Err(OcrError::Cancelled)
    ));
}

#[test]
fn cancelling_during_detection_skips_recognition() {
    init_logging();
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let ocr = TextSiftBuilder::new()
        .detector(CancellingDetector {
            cancel: cancel.clone(),
        })
        .recognizer(CancellingRecognizer {
            cancel: CancellationToken::new(),
            calls: calls.clone(),
        })
        .dictionary(CharDictionary::with_blank_index(SYMBOLS, 0).unwrap())
        .build()
        .unwrap();

    let result = ocr.detect(&test_image(), options(), &cancel);
    assert!(matches!(result, Err(OcrError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancelling_during_recognition_stops_remaining_boxes() {
    init_logging();
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    // One worker so the second box starts only after the first has finished.
    let ocr = TextSiftBuilder::new()
        .threads(1)
        .detector(FixedDetector)
        .recognizer(CancellingRecognizer {
            cancel: cancel.clone(),
            calls: calls.clone(),
        })
        .dictionary(CharDictionary::with_blank_index(SYMBOLS, 0).unwrap())
        .build()
        .unwrap();

    let result = ocr.detect(&test_image(), options(), &cancel);
    assert!(matches!(result, Err(OcrError::Cancelled)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn upside_down_crops_are_rotated() {
    init_logging();
    let ocr = TextSiftBuilder::new()
        .detector(FixedDetector)
        .classifier(UpsideDown)
        .recognizer(CornerRecognizer)
        .dictionary(CharDictionary::with_blank_index(SYMBOLS, 0).unwrap())
        .build()
        .unwrap();

    let rotated = ocr
        .detect(&test_image(), options(), &CancellationToken::new())
        .unwrap();
    let texts: Vec<_> = rotated.results.iter().map(|it| it.text.text.as_str()).collect();
    assert_eq!(texts, vec!["W", "W"]);

    let upright = ocr
        .detect(
            &test_image(),
            OcrOptions {
                use_angle_cls: false,
                ..options()
            },
            &CancellationToken::new(),
        )
        .unwrap();
    let texts: Vec<_> = upright.results.iter().map(|it| it.text.text.as_str()).collect();
    assert_eq!(texts, vec!["H", "H"]);
}

#[test]
fn undersized_dictionary_is_a_hard_failure() {
    init_logging();
    let ocr = TextSiftBuilder::new()
        .detector(FixedDetector)
        .recognizer(ColorRecognizer::default())
        .dictionary(CharDictionary::with_blank_index(["<blank>", "H", "e"], 0).unwrap())
        .build()
        .unwrap();
    let result = ocr.detect(&test_image(), options(), &CancellationToken::new());
    assert!(matches!(result, Err(OcrError::DictionaryIndex { .. })));
}

#[test]
fn missing_models_fail_to_build() {
    assert!(matches!(
        TextSiftBuilder::new().detector(FixedDetector).build(),
        Err(OcrError::InvalidConfig(_))
    ));
}
