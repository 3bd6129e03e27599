//! Windowing & aggregation: one open window per entity, sealed on a count or
//! time threshold (with sliding overlap when step < size), or force-flushed
//! when the entity is evicted so no partial window is lost.

use crate::config::{WindowConfig, WindowMode};
use crate::features::{FeatureVector, MISSING, NUM_FEATURES};
use serde::Serialize;
use std::collections::HashMap;

/// Per-feature summary over a sealed window. Sentinel-aware: dimensions with
/// no valid observations stay `MISSING` throughout.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
}

impl WindowSummary {
    fn compute(vectors: &[FeatureVector]) -> Self {
        let mut min = vec![MISSING; NUM_FEATURES];
        let mut max = vec![MISSING; NUM_FEATURES];
        let mut mean = vec![MISSING; NUM_FEATURES];
        let mut variance = vec![MISSING; NUM_FEATURES];

        for dim in 0..NUM_FEATURES {
            let valid: Vec<f32> = vectors
                .iter()
                .filter_map(|fv| fv.values.get(dim).copied())
                .filter(|v| !FeatureVector::is_missing(*v))
                .collect();
            if valid.is_empty() {
                continue;
            }
            let n = valid.len() as f32;
            let m = valid.iter().sum::<f32>() / n;
            min[dim] = valid.iter().copied().fold(f32::INFINITY, f32::min);
            max[dim] = valid.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            mean[dim] = m;
            variance[dim] = valid.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / n;
        }

        Self {
            min,
            max,
            mean,
            variance,
        }
    }
}

/// A sealed, bounded group of consecutive per-message vectors for one entity.
/// Consumed once by the classifier, then dropped.
#[derive(Debug, Clone)]
pub struct Window {
    pub entity_id: String,
    pub start_ms: i64,
    /// Exclusive upper bound in time mode; last-message timestamp otherwise.
    pub end_ms: i64,
    /// Per-message vectors, preserved for per-message classification.
    pub vectors: Vec<FeatureVector>,
    pub summary: WindowSummary,
    /// Sealed early because the entity was evicted.
    pub partial: bool,
}

impl Window {
    /// Classification input: sentinel-aware per-feature mean. Keeps one
    /// feature space for windowed and per-message (window_size = 1) modes.
    pub fn aggregate(&self) -> &[f32] {
        &self.summary.mean
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top `n` features by aggregated value, for verdict evidence.
    pub fn top_features(&self, n: usize) -> Vec<(String, f32)> {
        let mut pairs: Vec<(String, f32)> = crate::features::FEATURE_NAMES
            .iter()
            .zip(self.summary.mean.iter())
            .filter(|(_, v)| !FeatureVector::is_missing(**v))
            .map(|(name, v)| (name.to_string(), *v))
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        pairs.truncate(n);
        pairs
    }
}

struct OpenWindow {
    start_ms: i64,
    vectors: Vec<FeatureVector>,
}

/// One open window per entity; `push` seals and returns a window when its
/// close condition is met.
pub struct WindowAggregator {
    config: WindowConfig,
    open: HashMap<String, OpenWindow>,
}

impl WindowAggregator {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            open: HashMap::new(),
        }
    }

    pub fn push(&mut self, fv: FeatureVector) -> Option<Window> {
        let entity_id = fv.entity_id.clone();
        let window = self.open.entry(entity_id.clone()).or_insert(OpenWindow {
            start_ms: fv.timestamp_ms,
            vectors: Vec::new(),
        });

        match self.config.mode {
            WindowMode::Count => {
                window.vectors.push(fv);
                if window.vectors.len() as u64 >= self.config.window_size {
                    let step = self.config.window_step as usize;
                    let sealed_vectors = window.vectors.clone();
                    // Sliding: the tail beyond the step seeds the next window.
                    let carry: Vec<FeatureVector> =
                        window.vectors.drain(..).skip(step).collect();
                    window.start_ms = carry
                        .first()
                        .map(|v| v.timestamp_ms)
                        .unwrap_or(i64::MAX);
                    window.vectors = carry;
                    let start = sealed_vectors
                        .first()
                        .map(|v| v.timestamp_ms)
                        .unwrap_or(0);
                    if window.vectors.is_empty() {
                        self.open.remove(&entity_id);
                    }
                    return Some(seal(entity_id, start, None, sealed_vectors, false));
                }
                None
            }
            WindowMode::Time => {
                let span_ms = self.config.window_size as i64 * 1000;
                let step_ms = self.config.window_step as i64 * 1000;
                // Half-open bound [start, start + span): a vector at or past
                // the bound seals the current window before joining the next.
                if !window.vectors.is_empty() && fv.timestamp_ms >= window.start_ms + span_ms {
                    let sealed_start = window.start_ms;
                    let end = sealed_start + span_ms;
                    let sealed_vectors = window.vectors.clone();
                    // Advance the origin by whole steps until the new vector
                    // fits; overlapping vectors carry into the next window.
                    let mut new_start = sealed_start + step_ms;
                    while fv.timestamp_ms >= new_start + span_ms {
                        new_start += step_ms;
                    }
                    let mut carry: Vec<FeatureVector> = window
                        .vectors
                        .drain(..)
                        .filter(|v| v.timestamp_ms >= new_start)
                        .collect();
                    carry.push(fv);
                    window.start_ms = new_start;
                    window.vectors = carry;
                    return Some(seal(entity_id, sealed_start, Some(end), sealed_vectors, false));
                }
                if window.vectors.is_empty() {
                    window.start_ms = fv.timestamp_ms;
                }
                window.vectors.push(fv);
                None
            }
        }
    }

    /// Flush the entity's partial window (eviction or end of stream); the
    /// window is emitted rather than dropped so every message is accounted for.
    pub fn flush(&mut self, entity_id: &str) -> Option<Window> {
        let open = self.open.remove(entity_id)?;
        if open.vectors.is_empty() {
            return None;
        }
        Some(seal(
            entity_id.to_string(),
            open.start_ms,
            None,
            open.vectors,
            true,
        ))
    }

    /// Flush every open window (end of stream).
    pub fn flush_all(&mut self) -> Vec<Window> {
        let ids: Vec<String> = self.open.keys().cloned().collect();
        let mut out: Vec<Window> = ids.iter().filter_map(|id| self.flush(id)).collect();
        out.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        out
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

fn seal(
    entity_id: String,
    start_ms: i64,
    end_ms: Option<i64>,
    vectors: Vec<FeatureVector>,
    partial: bool,
) -> Window {
    let summary = WindowSummary::compute(&vectors);
    let end_ms = end_ms.unwrap_or_else(|| {
        vectors
            .iter()
            .map(|v| v.timestamp_ms)
            .max()
            .unwrap_or(start_ms)
    });
    Window {
        entity_id,
        start_ms,
        end_ms,
        vectors,
        summary,
        partial,
    }
}
