//! Classifier / scoring engine. The model family is pluggable: anything
//! implementing [`Classifier`] can sit on the stream. Training is an offline
//! bulk operation; `predict` must be bounded-time with no I/O because it runs
//! per sealed window.

mod centroid;
mod onnx;

pub use centroid::CentroidClassifier;
pub use onnx::OnnxClassifier;

use crate::error::IdsError;
use crate::message::Label;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One labeled aggregate vector for training or evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: Vec<f32>,
    pub label: Label,
}

/// What `fit` reports back: the label distribution it saw and how many
/// samples survived resampling.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub class_counts: Vec<(Label, usize)>,
    pub samples_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassMetrics {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

/// Per-class precision/recall/F1 plus the full confusion matrix
/// (rows = actual, columns = predicted, ordered by `Label::ALL`).
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub confusion: Vec<Vec<u64>>,
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
}

pub trait Classifier: Send + Sync {
    /// Train from labeled vectors. Class-imbalanced input is expected; the
    /// implementation must weight or resample rather than let the majority
    /// class drown the attacks. Degenerate label sets fail with class counts.
    fn fit(&mut self, samples: &[TrainingSample]) -> Result<TrainingReport, IdsError>;

    /// Label plus confidence in [0, 1]. Sentinel feature values must be
    /// skipped, never read as small magnitudes.
    fn predict(&self, features: &[f32]) -> (Label, f32);

    /// Persist an opaque artifact such that loading it reproduces `predict`
    /// outputs exactly.
    fn save(&self, path: &Path) -> Result<(), IdsError>;

    /// Family tag recorded in the artifact for load-time dispatch.
    fn family(&self) -> &'static str;

    /// Held-out evaluation using this model's `predict`.
    fn evaluate(&self, samples: &[TrainingSample]) -> EvalReport {
        let n = Label::ALL.len();
        let mut confusion = vec![vec![0u64; n]; n];
        for s in samples {
            let (predicted, _) = self.predict(&s.features);
            confusion[s.label.index()][predicted.index()] += 1;
        }

        let mut per_class = Vec::with_capacity(n);
        let mut correct = 0u64;
        for (i, label) in Label::ALL.into_iter().enumerate() {
            let tp = confusion[i][i];
            correct += tp;
            let fp: u64 = (0..n).filter(|&r| r != i).map(|r| confusion[r][i]).sum();
            let fn_: u64 = (0..n).filter(|&c| c != i).map(|c| confusion[i][c]).sum();
            let support: u64 = confusion[i].iter().sum();
            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            per_class.push(ClassMetrics {
                label,
                precision,
                recall,
                f1,
                support,
            });
        }
        let total: u64 = samples.len() as u64;
        EvalReport {
            confusion,
            per_class,
            accuracy: ratio(correct, total),
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Artifact header used for load-time family dispatch.
#[derive(Deserialize)]
struct ArtifactHeader {
    family: String,
}

/// Load a model artifact, dispatching on the family tag it carries.
/// ONNX artifacts are raw `.onnx` files and are detected by extension.
pub fn load_artifact(path: &Path) -> Result<Box<dyn Classifier>, IdsError> {
    if path.extension().and_then(|e| e.to_str()) == Some("onnx") {
        return Ok(Box::new(OnnxClassifier::load(path)?));
    }
    let data = std::fs::read_to_string(path)
        .map_err(|e| IdsError::model(format!("cannot read artifact {path:?}: {e}")))?;
    let header: ArtifactHeader = serde_json::from_str(&data)?;
    match header.family.as_str() {
        "centroid" => Ok(Box::new(CentroidClassifier::from_json(&data)?)),
        other => Err(IdsError::model(format!("unknown model family '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-output stub for exercising the evaluation plumbing.
    struct Always(Label);

    impl Classifier for Always {
        fn fit(&mut self, _: &[TrainingSample]) -> Result<TrainingReport, IdsError> {
            unimplemented!()
        }
        fn predict(&self, _: &[f32]) -> (Label, f32) {
            (self.0, 1.0)
        }
        fn save(&self, _: &Path) -> Result<(), IdsError> {
            unimplemented!()
        }
        fn family(&self) -> &'static str {
            "stub"
        }
    }

    #[test]
    fn confusion_matrix_shape_and_counts() {
        let model = Always(Label::Benign);
        let samples = vec![
            TrainingSample {
                features: vec![0.0],
                label: Label::Benign,
            },
            TrainingSample {
                features: vec![0.0],
                label: Label::Dos,
            },
        ];
        let report = model.evaluate(&samples);
        assert_eq!(report.confusion.len(), Label::ALL.len());
        assert_eq!(report.confusion[Label::Benign.index()][Label::Benign.index()], 1);
        assert_eq!(report.confusion[Label::Dos.index()][Label::Benign.index()], 1);
        assert_eq!(report.accuracy, 0.5);
    }

    #[test]
    fn benign_recall_with_constant_model() {
        let model = Always(Label::Benign);
        let samples: Vec<TrainingSample> = (0..4)
            .map(|_| TrainingSample {
                features: vec![0.0],
                label: Label::Benign,
            })
            .collect();
        let report = model.evaluate(&samples);
        let benign = &report.per_class[Label::Benign.index()];
        assert_eq!(benign.recall, 1.0);
        assert_eq!(benign.precision, 1.0);
        assert_eq!(benign.f1, 1.0);
        assert_eq!(benign.support, 4);
    }

    #[test]
    fn unknown_family_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weird.json");
        std::fs::write(&path, r#"{"family":"quantum"}"#).unwrap();
        assert!(matches!(
            load_artifact(&path),
            Err(IdsError::Model { .. })
        ));
    }
}
