//! OCR engine seam and greedy decoding
//!
//! The recognition model itself is a collaborator: anything that maps a
//! canonical 128x32 RGB image to per-step class probability distributions
//! implements [`OcrEngine`]. The pipeline loads it once and shares it across
//! all recognition workers.

pub mod confidence;
pub mod engine;

use image::RgbImage;
use ndarray::Array2;
use thiserror::Error;

pub use engine::OnnxOcrEngine;

/// Characters the recognizer may emit. Everything else is stripped.
pub const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789@=";

/// Class index reserved for the end-of-sequence token.
pub const EOS_CLASS: usize = 0;

/// Recognition-engine failures. Recorded as an empty-text, zero-confidence
/// result; never retried and never allowed to block the pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("inference runtime failure: {0}")]
    Runtime(#[from] ort::Error),
    #[error("model produced unusable output: {0}")]
    BadOutput(String),
    #[error("canonical image must be 128x32, got {0}x{1}")]
    BadInput(u32, u32),
    #[error("model has no inputs")]
    NoInput,
}

/// Per-step class probability distributions, one row per decoding step.
/// Column [`EOS_CLASS`] is the end-of-sequence token; column `i > 0` maps to
/// `ALPHABET[i - 1]`.
pub struct StepProbabilities {
    probs: Array2<f32>,
}

impl StepProbabilities {
    pub fn new(probs: Array2<f32>) -> Self {
        Self { probs }
    }

    pub fn steps(&self) -> usize {
        self.probs.nrows()
    }

    pub fn classes(&self) -> usize {
        self.probs.ncols()
    }

    pub fn row(&self, step: usize) -> ndarray::ArrayView1<'_, f32> {
        self.probs.row(step)
    }
}

/// Collaborator mapping a canonical image to per-step class probabilities.
pub trait OcrEngine: Send + Sync {
    fn infer(&self, canonical: &RgbImage) -> Result<StepProbabilities, EngineError>;
}

/// Greedy argmax decode. Stops at the first end-of-sequence step and returns
/// the decoded text together with the probability of each chosen character.
pub fn decode(probs: &StepProbabilities) -> (String, Vec<f32>) {
    let alphabet: Vec<char> = ALPHABET.chars().collect();
    let mut text = String::new();
    let mut confidences = Vec::new();

    for step in 0..probs.steps() {
        let row = probs.row(step);
        let mut best_class = EOS_CLASS;
        let mut best_prob = f32::MIN;
        for (class, &p) in row.iter().enumerate() {
            if p > best_prob {
                best_class = class;
                best_prob = p;
            }
        }

        if best_class == EOS_CLASS {
            break;
        }
        let Some(&ch) = alphabet.get(best_class - 1) else {
            // Class outside the alphabet: treat as end of usable signal.
            break;
        };
        text.push(ch);
        confidences.push(best_prob);
    }

    (text, confidences)
}

/// Strip whitespace and anything outside the recognition alphabet. Letter
/// case is never forced.
pub fn filter_allowed(text: &str) -> String {
    text.chars().filter(|c| ALPHABET.contains(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Rows of one-hot-ish distributions selecting the given classes.
    fn probs_for_classes(classes: &[(usize, f32)], num_classes: usize) -> StepProbabilities {
        let mut arr = Array2::<f32>::zeros((classes.len(), num_classes));
        for (step, &(class, p)) in classes.iter().enumerate() {
            // Spread the remainder thinly so the chosen class wins.
            let rest = (1.0 - p) / (num_classes - 1) as f32;
            for c in 0..num_classes {
                arr[[step, c]] = if c == class { p } else { rest };
            }
        }
        StepProbabilities::new(arr)
    }

    #[test]
    fn test_decode_stops_at_eos() {
        let n = ALPHABET.len() + 1;
        // 'A' is class 1, 'B' class 2; step 3 is EOS.
        let probs = probs_for_classes(&[(1, 0.9), (2, 0.8), (EOS_CLASS, 0.99), (3, 0.9)], n);
        let (text, confs) = decode(&probs);
        assert_eq!(text, "AB");
        assert_eq!(confs.len(), 2);
        assert!((confs[0] - 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_decode_empty_for_immediate_eos() {
        let n = ALPHABET.len() + 1;
        let probs = probs_for_classes(&[(EOS_CLASS, 0.99)], n);
        let (text, confs) = decode(&probs);
        assert!(text.is_empty());
        assert!(confs.is_empty());
    }

    #[test]
    fn test_filter_strips_disallowed_characters() {
        assert_eq!(filter_allowed("Ab3 @=!#\tZ"), "Ab3@=Z");
        assert_eq!(filter_allowed("  "), "");
    }

    #[test]
    fn test_filter_preserves_case() {
        assert_eq!(filter_allowed("aBcD"), "aBcD");
    }
}
