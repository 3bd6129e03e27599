//! Per-class centroid classifier: the default trained family. Learns a
//! mean/variance profile per label and scores by variance-normalized distance
//! with inverse-frequency class weights, so the benign flood cannot drown the
//! attack classes. Transparent, bounded-time predict, JSON artifact.

use super::{Classifier, TrainingReport, TrainingSample};
use crate::error::IdsError;
use crate::features::FeatureVector;
use crate::message::Label;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const VARIANCE_FLOOR: f64 = 1e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassProfile {
    label: Label,
    weight: f64,
    count: usize,
    mean: Vec<f64>,
    variance: Vec<f64>,
    /// Valid (non-sentinel) observations per dimension during fit.
    dim_support: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidClassifier {
    family: String,
    feature_dim: usize,
    classes: Vec<ClassProfile>,
    /// Cap on majority/minority sample ratio before downsampling; 0 disables.
    pub max_class_ratio: usize,
    /// Seed for the resampling hook, kept in the artifact for reproducibility.
    pub resample_seed: u64,
}

impl CentroidClassifier {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            family: "centroid".to_string(),
            feature_dim,
            classes: Vec::new(),
            max_class_ratio: 20,
            resample_seed: 7,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.classes.is_empty()
    }

    pub(super) fn from_json(data: &str) -> Result<Self, IdsError> {
        let model: Self = serde_json::from_str(data)?;
        if model.family != "centroid" {
            return Err(IdsError::model("artifact family mismatch"));
        }
        Ok(model)
    }

    /// Downsampling hook for extreme imbalance: trims each class to at most
    /// `max_class_ratio` times the smallest class, deterministically.
    fn resample<'a>(&self, samples: &'a [TrainingSample]) -> Vec<&'a TrainingSample> {
        let mut by_class: BTreeMap<Label, Vec<&TrainingSample>> = BTreeMap::new();
        for s in samples {
            by_class.entry(s.label).or_default().push(s);
        }
        let min_count = by_class.values().map(|v| v.len()).min().unwrap_or(0);
        if self.max_class_ratio == 0 || min_count == 0 {
            return samples.iter().collect();
        }
        let cap = min_count * self.max_class_ratio;
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.resample_seed);
        let mut out = Vec::new();
        for (_, mut group) in by_class {
            if group.len() > cap {
                group.shuffle(&mut rng);
                group.truncate(cap);
            }
            out.extend(group);
        }
        out
    }
}

impl Classifier for CentroidClassifier {
    fn fit(&mut self, samples: &[TrainingSample]) -> Result<TrainingReport, IdsError> {
        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        for s in samples {
            *counts.entry(s.label).or_insert(0) += 1;
        }
        let class_counts: Vec<(String, usize)> = counts
            .iter()
            .map(|(l, c)| (l.as_str().to_string(), *c))
            .collect();
        if samples.is_empty() {
            return Err(IdsError::Training {
                reason: "no training samples".into(),
                class_counts,
            });
        }
        if counts.len() < 2 {
            return Err(IdsError::Training {
                reason: "need at least two distinct labels".into(),
                class_counts,
            });
        }
        if let Some(s) = samples.iter().find(|s| s.features.len() != self.feature_dim) {
            return Err(IdsError::Training {
                reason: format!(
                    "feature dim mismatch: expected {}, got {}",
                    self.feature_dim,
                    s.features.len()
                ),
                class_counts,
            });
        }

        let kept = self.resample(samples);
        let total = kept.len() as f64;

        let mut classes = Vec::new();
        for (&label, _) in counts.iter() {
            let members: Vec<&&TrainingSample> =
                kept.iter().filter(|s| s.label == label).collect();
            if members.is_empty() {
                continue;
            }
            let mut mean = vec![0.0f64; self.feature_dim];
            let mut support = vec![0u64; self.feature_dim];
            for s in &members {
                for (d, &x) in s.features.iter().enumerate() {
                    if !FeatureVector::is_missing(x) {
                        mean[d] += x as f64;
                        support[d] += 1;
                    }
                }
            }
            for d in 0..self.feature_dim {
                if support[d] > 0 {
                    mean[d] /= support[d] as f64;
                }
            }
            let mut variance = vec![0.0f64; self.feature_dim];
            for s in &members {
                for (d, &x) in s.features.iter().enumerate() {
                    if !FeatureVector::is_missing(x) {
                        let delta = x as f64 - mean[d];
                        variance[d] += delta * delta;
                    }
                }
            }
            for d in 0..self.feature_dim {
                variance[d] = if support[d] > 1 {
                    (variance[d] / (support[d] - 1) as f64).max(VARIANCE_FLOOR)
                } else {
                    VARIANCE_FLOOR
                };
            }
            // Inverse-frequency weighting: rare classes get proportionally
            // louder priors.
            let weight = total / (counts.len() as f64 * members.len() as f64);
            classes.push(ClassProfile {
                label,
                weight,
                count: members.len(),
                mean,
                variance,
                dim_support: support,
            });
        }

        self.classes = classes;
        Ok(TrainingReport {
            class_counts: counts.into_iter().collect(),
            samples_used: kept.len(),
        })
    }

    fn predict(&self, features: &[f32]) -> (Label, f32) {
        if self.classes.is_empty() {
            // The pipeline guards against this with ModelNotTrained; the
            // trait-level contract is still total.
            return (Label::Benign, 0.0);
        }

        let mut scores: Vec<(Label, f64)> = Vec::with_capacity(self.classes.len());
        for class in &self.classes {
            let mut dist = 0.0f64;
            let mut dims = 0u32;
            for (d, &x) in features.iter().enumerate().take(self.feature_dim) {
                if FeatureVector::is_missing(x) || class.dim_support.get(d) == Some(&0) {
                    continue;
                }
                let delta = x as f64 - class.mean[d];
                dist += delta * delta / class.variance[d];
                dims += 1;
            }
            let score = if dims == 0 {
                // No usable dimensions: fall back to the class prior alone so
                // an all-sentinel vector does not silently read as benign.
                class.weight
            } else {
                class.weight * (-0.5 * dist / dims as f64).exp()
            };
            scores.push((class.label, score));
        }

        let sum: f64 = scores.iter().map(|(_, s)| s).sum();
        let (label, best) = scores
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((Label::Benign, 0.0));
        let confidence = if sum > 0.0 {
            (best / sum).clamp(0.0, 1.0) as f32
        } else {
            1.0 / Label::ALL.len() as f32
        };
        (label, confidence)
    }

    fn save(&self, path: &Path) -> Result<(), IdsError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn family(&self) -> &'static str {
        "centroid"
    }
}
