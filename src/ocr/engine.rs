//! ONNX Runtime backed recognition engine
//!
//! Loads a PARSeq-style sequence recognition model once and reuses the
//! session for every inference call. The session sits behind a mutex so one
//! engine can be shared across all recognition workers.

use std::path::Path;

use image::RgbImage;
use ndarray::{Array2, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use tracing::info;

use super::{EngineError, OcrEngine, StepProbabilities};
use crate::vision::{CANONICAL_HEIGHT, CANONICAL_WIDTH};

pub struct OnnxOcrEngine {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxOcrEngine {
    /// Load the model from an ONNX file. Expensive; call once and share the
    /// engine behind an `Arc`.
    pub fn load(model_path: &Path) -> Result<Self, EngineError> {
        info!("Loading OCR model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort::Error::from)?
            .with_intra_threads(4)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or(EngineError::NoInput)?;

        info!("OCR model loaded. Input tensor: {input_name}");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl OcrEngine for OnnxOcrEngine {
    fn infer(&self, canonical: &RgbImage) -> Result<StepProbabilities, EngineError> {
        let (width, height) = canonical.dimensions();
        if (width, height) != (CANONICAL_WIDTH, CANONICAL_HEIGHT) {
            return Err(EngineError::BadInput(width, height));
        }

        let tensor = image_to_tensor(canonical);
        let shape: [usize; 4] = [1, 3, height as usize, width as usize];
        let (flat, _offset) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, flat))?;

        // Extract while the session lock is held, then release.
        let (dims, logits) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![&*self.input_name => input])?;

            let (shape, data) = if let Some(output) = outputs.get("output") {
                output.try_extract_tensor::<f32>()?
            } else {
                let first_key = outputs
                    .keys()
                    .next()
                    .ok_or_else(|| EngineError::BadOutput("model produced no outputs".into()))?;
                outputs[first_key].try_extract_tensor::<f32>()?
            };

            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, data.to_vec())
        };

        let (steps, classes) = match dims.as_slice() {
            [1, t, v] => (*t, *v),
            [t, v] => (*t, *v),
            other => {
                return Err(EngineError::BadOutput(format!(
                    "unexpected logits shape {other:?}"
                )))
            }
        };

        let mut probs = Array2::from_shape_vec((steps, classes), logits)
            .map_err(|e| EngineError::BadOutput(e.to_string()))?;
        softmax_rows(&mut probs);

        Ok(StepProbabilities::new(probs))
    }
}

/// Normalize the canonical RGB image to the model's expected NCHW layout:
/// `(x / 255 - 0.5) / 0.5`, mapping [0, 255] to [-1, 1].
fn image_to_tensor(canonical: &RgbImage) -> Array4<f32> {
    let (width, height) = canonical.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, px) in canonical.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (f32::from(px.0[c]) / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

fn softmax_rows(m: &mut Array2<f32>) {
    for mut row in m.rows_mut() {
        let max = row.iter().copied().fold(f32::MIN, f32::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        if sum > 0.0 {
            for v in row.iter_mut() {
                *v /= sum;
            }
        }
    }
}
