use std::time::Instant;

use textsift::{
    onnx::{OnnxAngleClassifier, OnnxDetector, OnnxRecognizer, DEFAULT_PROVIDERS},
    BlankPosition, CharDictionary, OcrOptions, TextSiftBuilder,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let image_path = args
        .next()
        .unwrap_or_else(|| "tests/data/test_image.png".to_string());
    let models = args.next().unwrap_or_else(|| "tests/data/models".to_string());
    let threads = 4;

    let image = image::open(&image_path)?;
    let ocr = TextSiftBuilder::new()
        .threads(threads)
        .detector(OnnxDetector::init(
            format!("{models}/det.onnx"),
            threads,
            DEFAULT_PROVIDERS,
        )?)
        .classifier(OnnxAngleClassifier::init(format!("{models}/cls.onnx"), threads)?)
        .recognizer(OnnxRecognizer::init(
            format!("{models}/rec.onnx"),
            threads,
            DEFAULT_PROVIDERS,
        )?)
        .dictionary(CharDictionary::from_keys_file(
            format!("{models}/ppocr_keys_v1.txt"),
            true,
            BlankPosition::First,
        )?)
        .max_side_len(2048)
        .build()?;

    let start = Instant::now();
    let output = ocr.detect(&image, OcrOptions::default(), &CancellationToken::new())?;
    log::debug!("{:?}", start.elapsed());

    for line in &output.lines {
        println!("{:.3}\t{}", line.confidence, line.text);
    }
    Ok(())
}
