//! ONNX Runtime classifier variant: inference-only, for models trained
//! offline (the usual route for deep sequence models). Input `[1, dim]` f32,
//! output one score per label in `Label::ALL` order.

use super::{Classifier, TrainingReport, TrainingSample};
use crate::error::IdsError;
use crate::features::{FeatureVector, NUM_FEATURES};
use crate::message::Label;
use ndarray::Array2;
use std::path::Path;
use std::sync::OnceLock;

static ORT_ENV: OnceLock<std::sync::Arc<ort::environment::Environment>> = OnceLock::new();

fn init_env() -> &'static ort::environment::Environment {
    ORT_ENV.get_or_init(|| {
        ort::init()
            .with_name("v2i-ids")
            .commit()
            .expect("ORT environment")
    })
}

pub struct OnnxClassifier {
    session: ort::session::Session,
    input_name: String,
    feature_dim: usize,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> Result<Self, IdsError> {
        let _env = init_env();
        if !path.exists() {
            return Err(IdsError::model(format!("ONNX model not found at {path:?}")));
        }
        let session = ort::session::Session::builder()
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| IdsError::model(format!("ONNX session: {e}")))?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());
        Ok(Self {
            session,
            input_name,
            feature_dim: NUM_FEATURES,
        })
    }

    fn scores(&self, features: &[f32]) -> Option<Vec<f32>> {
        let dim = self.feature_dim.min(features.len());
        // The graph cannot express "skip this dimension", so sentinels are
        // zeroed here; exported models are trained with the same convention.
        let values: Vec<f32> = features[..dim]
            .iter()
            .map(|&v| if FeatureVector::is_missing(v) { 0.0 } else { v })
            .collect();
        let arr = Array2::from_shape_vec((1, dim), values).ok()?;
        let input = ort::value::Tensor::from_array(arr.into_dyn()).ok()?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input].ok()?)
            .ok()?;
        let out = outputs.values().next()?;
        let (_, data) = out.try_extract_raw_tensor::<f32>().ok()?;
        Some(data.to_vec())
    }
}

impl Classifier for OnnxClassifier {
    fn fit(&mut self, _samples: &[TrainingSample]) -> Result<TrainingReport, IdsError> {
        Err(IdsError::model(
            "ONNX models are trained offline; fit is unsupported for this family",
        ))
    }

    fn predict(&self, features: &[f32]) -> (Label, f32) {
        let Some(scores) = self.scores(features) else {
            return (Label::Benign, 0.0);
        };
        let mut best = (Label::Benign, f32::NEG_INFINITY);
        for (i, label) in Label::ALL.into_iter().enumerate() {
            if let Some(&s) = scores.get(i) {
                if s > best.1 {
                    best = (label, s);
                }
            }
        }
        let sum: f32 = scores.iter().take(Label::ALL.len()).map(|s| s.max(0.0)).sum();
        let confidence = if sum > 0.0 {
            (best.1.max(0.0) / sum).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (best.0, confidence)
    }

    fn save(&self, _path: &Path) -> Result<(), IdsError> {
        Err(IdsError::model(
            "ONNX artifacts are managed as exported .onnx files",
        ))
    }

    fn family(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_is_an_error() {
        let err = OnnxClassifier::load(Path::new("nonexistent.onnx"));
        assert!(matches!(err, Err(IdsError::Model { .. })));
    }
}
