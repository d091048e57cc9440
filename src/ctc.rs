//! CTC decoding of recognizer output into text.
//!
//! Input is a `T x V` matrix of per-timestep class probabilities whose class
//! axis follows a [`CharDictionary`], blank included.

use std::collections::HashMap;

use float_ord::FloatOrd;
use ndarray::ArrayView2;
use tracing::instrument;

use crate::{
    dict::CharDictionary,
    error::{OcrError, Result},
    RecognitionResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMethod {
    #[default]
    Greedy,
    BeamSearch {
        width: usize,
    },
}

#[derive(Debug, Clone)]
pub struct CtcDecoder {
    dictionary: CharDictionary,
}

/// Probability mass of one prefix, split by whether its last timestep was
/// blank. Stored as natural logs.
#[derive(Debug, Clone)]
struct Beam {
    blank: f64,
    non_blank: f64,
    /// Score of each emitted character along the most probable path.
    character_scores: Vec<f32>,
    /// Log probability of the path that supplied `character_scores`.
    best_path: f64,
}

impl Beam {
    fn empty() -> Self {
        Self {
            blank: f64::NEG_INFINITY,
            non_blank: f64::NEG_INFINITY,
            character_scores: Vec::new(),
            best_path: f64::NEG_INFINITY,
        }
    }

    fn total(&self) -> f64 {
        log_sum_exp(self.blank, self.non_blank)
    }

    fn offer_scores(&mut self, path: f64, scores: impl FnOnce() -> Vec<f32>) {
        if path > self.best_path {
            self.best_path = path;
            self.character_scores = scores();
        }
    }
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

fn ln(p: f32) -> f64 {
    (p.max(f32::MIN_POSITIVE) as f64).ln()
}

impl CtcDecoder {
    pub fn new(dictionary: CharDictionary) -> Self {
        Self { dictionary }
    }

    pub fn decode(&self, scores: ArrayView2<f32>, method: DecodeMethod) -> Result<RecognitionResult> {
        match method {
            DecodeMethod::Greedy => self.decode_greedy(scores),
            DecodeMethod::BeamSearch { width } => self.decode_beam(scores, width),
        }
    }

    fn check_classes(&self, scores: &ArrayView2<f32>) -> Result<()> {
        if scores.ncols() == 0 && scores.nrows() > 0 {
            return Err(OcrError::ShapeMismatch {
                stage: "recognition scores",
                expected: vec![scores.nrows(), self.dictionary.len()],
                actual: scores.shape().to_vec(),
            });
        }
        Ok(())
    }

    /// Best class per timestep; blanks and repeats of the previous timestep
    /// are collapsed.
    #[instrument(level = "trace", skip(self, scores))]
    pub fn decode_greedy(&self, scores: ArrayView2<f32>) -> Result<RecognitionResult> {
        self.check_classes(&scores)?;
        let blank = self.dictionary.blank_index();

        let mut text = String::new();
        let mut character_scores = Vec::new();
        let mut previous = None;
        for step in scores.outer_iter() {
            let Some((index, score)) = step
                .indexed_iter()
                .max_by_key(|(_, score)| FloatOrd(**score))
                .map(|(index, score)| (index, *score))
            else {
                continue;
            };
            let symbol = self.dictionary.symbol(index)?;
            if index != blank && previous != Some(index) {
                text.push_str(symbol);
                character_scores.push(score);
            }
            previous = Some(index);
        }

        Ok(RecognitionResult::from_characters(text, character_scores))
    }

    /// Prefix beam search keeping the `width` most probable label sequences.
    /// Each step extends every beam by the `width` most probable classes and
    /// the blank.
    #[instrument(level = "trace", skip(self, scores))]
    pub fn decode_beam(&self, scores: ArrayView2<f32>, width: usize) -> Result<RecognitionResult> {
        self.check_classes(&scores)?;
        let width = width.max(1);
        let blank = self.dictionary.blank_index();

        let mut beams: Vec<(Vec<usize>, Beam)> = vec![(
            Vec::new(),
            Beam {
                blank: 0.0,
                best_path: 0.0,
                ..Beam::empty()
            },
        )];

        for step in scores.outer_iter() {
            let mut ranked = step.indexed_iter().collect::<Vec<_>>();
            ranked.sort_by_key(|(index, score)| (std::cmp::Reverse(FloatOrd(**score)), *index));
            let mut candidates = ranked
                .into_iter()
                .take(width)
                .map(|(index, score)| (index, *score))
                .collect::<Vec<_>>();
            if blank < step.len() && !candidates.iter().any(|(index, _)| *index == blank) {
                candidates.push((blank, step[blank]));
            }
            for (index, _) in &candidates {
                self.dictionary.symbol(*index)?;
            }

            let mut next: HashMap<Vec<usize>, Beam> = HashMap::new();
            for (prefix, beam) in &beams {
                let total = beam.total();
                for &(index, score) in &candidates {
                    let p = ln(score);
                    if index == blank {
                        let entry = next.entry(prefix.clone()).or_insert_with(Beam::empty);
                        entry.blank = log_sum_exp(entry.blank, total + p);
                        entry.offer_scores(total + p, || beam.character_scores.clone());
                        continue;
                    }

                    let mut extended = prefix.clone();
                    extended.push(index);
                    let extend_from = if prefix.last() == Some(&index) {
                        // A repeat only starts a new character after a blank;
                        // otherwise it collapses into the current prefix.
                        if beam.non_blank > f64::NEG_INFINITY {
                            let entry = next.entry(prefix.clone()).or_insert_with(Beam::empty);
                            entry.non_blank = log_sum_exp(entry.non_blank, beam.non_blank + p);
                            entry.offer_scores(beam.non_blank + p, || {
                                beam.character_scores.clone()
                            });
                        }
                        beam.blank
                    } else {
                        total
                    };
                    if extend_from == f64::NEG_INFINITY {
                        continue;
                    }
                    let entry = next.entry(extended).or_insert_with(Beam::empty);
                    entry.non_blank = log_sum_exp(entry.non_blank, extend_from + p);
                    entry.offer_scores(extend_from + p, || {
                        let mut scores = beam.character_scores.clone();
                        scores.push(score);
                        scores
                    });
                }
            }

            beams = next.into_iter().collect();
            beams.sort_by(|(a_prefix, a), (b_prefix, b)| {
                FloatOrd(b.total())
                    .cmp(&FloatOrd(a.total()))
                    .then_with(|| a_prefix.cmp(b_prefix))
            });
            beams.truncate(width);
        }

        let Some((prefix, beam)) = beams.into_iter().next() else {
            return Ok(RecognitionResult::default());
        };
        let text = prefix
            .iter()
            .map(|&index| self.dictionary.symbol(index))
            .collect::<Result<String>>()?;
        Ok(RecognitionResult::from_characters(text, beam.character_scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::BlankPosition;
    use ndarray::Array2;

    fn decoder() -> CtcDecoder {
        CtcDecoder::new(CharDictionary::with_blank_index(["<blank>", "a", "b", "c"], 0).unwrap())
    }

    /// One-hot-ish rows: `peak` on the chosen index, the rest spread evenly.
    fn scores_for(indices: &[usize], classes: usize, peak: f32) -> Array2<f32> {
        let rest = (1.0 - peak) / (classes - 1) as f32;
        Array2::from_shape_fn((indices.len(), classes), |(t, v)| {
            if v == indices[t] {
                peak
            } else {
                rest
            }
        })
    }

    #[test]
    fn greedy_collapses_repeats_and_blanks() {
        let decoder = CtcDecoder::new(
            CharDictionary::with_blank_index(["<blank>", "a", "b"], 0).unwrap(),
        );
        let mut scores = scores_for(&[0, 1, 1, 0, 2, 2, 0], 3, 0.8);
        scores[[1, 1]] = 0.9;
        scores[[1, 0]] = 0.05;
        scores[[1, 2]] = 0.05;
        let result = decoder.decode_greedy(scores.view()).unwrap();
        assert_eq!(result.text, "ab");
        assert_eq!(result.character_scores, vec![0.9, 0.8]);
        assert!((result.confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn repeats_without_blanks_decode_like_singletons() {
        let decoder = decoder();
        let repeated = decoder
            .decode_greedy(scores_for(&[1, 1, 2, 2, 3], 4, 0.9).view())
            .unwrap();
        let single = decoder
            .decode_greedy(scores_for(&[1, 2, 3], 4, 0.9).view())
            .unwrap();
        assert_eq!(repeated.text, "abc");
        assert_eq!(repeated.text, single.text);
    }

    #[test]
    fn blank_separates_identical_symbols() {
        let result = decoder()
            .decode_greedy(scores_for(&[1, 0, 1], 4, 0.9).view())
            .unwrap();
        assert_eq!(result.text, "aa");
    }

    #[test]
    fn empty_text_has_zero_confidence() {
        let result = decoder()
            .decode_greedy(scores_for(&[0, 0, 0], 4, 0.9).view())
            .unwrap();
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn index_past_dictionary_is_an_error() {
        let scores = scores_for(&[1, 5], 6, 0.9);
        assert!(matches!(
            decoder().decode_greedy(scores.view()),
            Err(OcrError::DictionaryIndex { index: 5, len: 4 })
        ));
        assert!(matches!(
            decoder().decode_beam(scores.view(), 3),
            Err(OcrError::DictionaryIndex { .. })
        ));
    }

    #[test]
    fn blank_last_convention() {
        let decoder = CtcDecoder::new(CharDictionary::new(["a", "b"], BlankPosition::Last));
        let result = decoder
            .decode_greedy(scores_for(&[0, 2, 1, 1, 2], 3, 0.9).view())
            .unwrap();
        assert_eq!(result.text, "ab");
    }

    #[test]
    fn beam_matches_greedy_on_confident_input() {
        let decoder = decoder();
        let scores = scores_for(&[0, 1, 1, 0, 2, 0, 3, 3], 4, 0.95);
        let greedy = decoder.decode(scores.view(), DecodeMethod::Greedy).unwrap();
        let beam = decoder
            .decode(scores.view(), DecodeMethod::BeamSearch { width: 4 })
            .unwrap();
        assert_eq!(greedy.text, "abc");
        assert_eq!(beam.text, greedy.text);
        assert_eq!(beam.character_scores.len(), 3);
    }

    #[test]
    fn beam_merges_paths_that_greedy_cannot() {
        let decoder = CtcDecoder::new(
            CharDictionary::with_blank_index(["<blank>", "a", "b"], 0).unwrap(),
        );
        let row = [0.4f32, 0.35, 0.25];
        let scores = Array2::from_shape_fn((2, 3), |(_, v)| row[v]);

        let greedy = decoder.decode_greedy(scores.view()).unwrap();
        assert_eq!(greedy.text, "");

        // P("a") = 0.35*0.4 + 0.4*0.35 + 0.35*0.35 beats P("") = 0.16.
        let beam = decoder.decode_beam(scores.view(), 3).unwrap();
        assert_eq!(beam.text, "a");
        assert!((beam.confidence - 0.35).abs() < 1e-6);
    }

    #[test]
    fn beam_keeps_repeats_split_by_blank() {
        let result = decoder()
            .decode_beam(scores_for(&[1, 0, 1], 4, 0.9).view(), 2)
            .unwrap();
        assert_eq!(result.text, "aa");
    }
}
