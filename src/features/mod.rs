//! Per-message feature extraction: pure function of (message, entity snapshot).
//!
//! Four independently toggleable families. Features are normalized to [0, 1];
//! history-derived features with no history (and all slots of a disabled
//! family) carry the `MISSING` sentinel so the vector width never changes.

mod extract;

pub use extract::FeatureExtractor;

use serde::{Deserialize, Serialize};

/// Sentinel for an unavailable feature. Genuine values are non-negative, so
/// the sentinel is unambiguous; classifiers skip sentinel dimensions instead
/// of reading them as "small" (which would bias toward benign).
pub const MISSING: f32 = -1.0;

pub const FEATURE_NAMES: &[&str] = &[
    // kinematic consistency
    "implied_speed",      // speed implied by consecutive reports, vs. nominal cruising speed
    "speed_delta",        // |implied - reported| speed
    "teleport_ratio",     // implied speed vs. physical plausibility cap
    "heading_delta",      // heading change vs. previous report
    "accel",              // |dv/dt| vs. plausibility cap
    // timing
    "interarrival",       // gap to previous report
    "interval_zscore",    // gap vs. entity's historical mean/std
    "msg_rate",           // short-horizon message rate (flooding)
    // identity / behavioral
    "new_id_rate",        // new identities near this position (Sybil)
    "neighbor_density",   // entities resident in the cell
    // protocol sanity
    "seq_gap",            // sequence-number discontinuity
    "payload_violations", // out-of-range / malformed payload fields
    "replay_score",       // payload digest repeats within history
    "out_of_order",       // claimed timestamp regression
];

pub const NUM_FEATURES: usize = 14;

/// Fixed-width feature vector for one message. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,
    pub entity_id: String,
    pub timestamp_ms: i64,
    pub msg_id: String,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f32> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn is_missing(value: f32) -> bool {
        value < 0.0
    }
}
