//! Pipeline configuration. Loaded from a JSON file; every key has a default,
//! and `validate()` rejects bad values at startup before any message flows.

use crate::error::IdsError;
use crate::message::Label;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdsConfig {
    /// Data directory (verdict store, model cache)
    pub data_dir: PathBuf,
    /// Path to the model artifact used for inference
    pub model_path: PathBuf,
    /// Entity state tracking
    pub tracker: TrackerConfig,
    /// Feature extraction parameters
    pub features: FeaturesConfig,
    /// Windowing & aggregation
    pub window: WindowConfig,
    /// Alerting thresholds and hysteresis
    pub decision: DecisionConfig,
    /// Verdict sinks
    pub sink: SinkConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Per-entity history ring buffer length
    pub history_len: usize,
    /// Idle TTL before an entity is evicted (stream time)
    pub entity_ttl_seconds: u64,
    /// Interval between eviction sweeps (stream time)
    pub sweep_interval_seconds: u64,
    /// Grid cell edge for identity/neighborhood features (meters)
    pub grid_cell_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Feature family toggles
    pub kinematic: bool,
    pub timing: bool,
    pub identity: bool,
    pub protocol: bool,
    /// Speed above which motion between two reports counts as a teleport (m/s)
    pub max_plausible_speed_mps: f64,
    /// Acceleration normalization cap (m/s^2)
    pub max_plausible_accel_mps2: f64,
    /// Message rate at which the flooding feature saturates (msgs/s)
    pub rate_saturation_hz: f64,
    /// New identities per cell within the recency horizon at which the
    /// Sybil feature saturates
    pub identity_saturation: u32,
    /// Recency horizon for new-identity counting (seconds)
    pub identity_window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// Close after `window_size` messages
    Count,
    /// Close after `window_size` seconds of claimed time, half-open bound
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub mode: WindowMode,
    /// Messages (count mode) or seconds (time mode) per window
    pub window_size: u64,
    /// Advance per sealed window; step < size gives sliding overlap
    pub window_step: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Confidence threshold applied when a class has no specific entry
    pub default_threshold: f32,
    /// Per-class overrides
    pub per_class_threshold: HashMap<Label, f32>,
    /// Require N qualifying windows out of the last K before alerting
    pub hysteresis_n: u32,
    pub hysteresis_k: u32,
    /// Suppress duplicate alerts for this long (stream time)
    pub cooldown_seconds: u64,
}

impl DecisionConfig {
    pub fn threshold_for(&self, label: Label) -> f32 {
        self.per_class_threshold
            .get(&label)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Append verdicts as ndjson to this file
    pub jsonl_path: Option<PathBuf>,
    /// POST verdicts to this endpoint
    pub http_endpoint: Option<String>,
    /// Persist verdicts in the local encrypted store
    pub store_verdicts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("v2i-ids"),
            model_path: PathBuf::from("model.json"),
            tracker: TrackerConfig::default(),
            features: FeaturesConfig::default(),
            window: WindowConfig::default(),
            decision: DecisionConfig::default(),
            sink: SinkConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_len: 50,
            entity_ttl_seconds: 30,
            sweep_interval_seconds: 5,
            grid_cell_m: 100.0,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            kinematic: true,
            timing: true,
            identity: true,
            protocol: true,
            max_plausible_speed_mps: 100.0,
            max_plausible_accel_mps2: 12.0,
            rate_saturation_hz: 20.0,
            identity_saturation: 10,
            identity_window_seconds: 10,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            mode: WindowMode::Count,
            window_size: 10,
            window_step: 10,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.75,
            per_class_threshold: HashMap::new(),
            hysteresis_n: 3,
            hysteresis_k: 5,
            cooldown_seconds: 60,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            http_endpoint: None,
            store_verdicts: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl IdsConfig {
    /// Load from JSON file if present; otherwise return default.
    pub fn load(path: &std::path::Path) -> Result<Self, IdsError> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<IdsConfig>(&data)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid values before any message is processed.
    pub fn validate(&self) -> Result<(), IdsError> {
        if self.tracker.history_len < 2 {
            return Err(IdsError::config("tracker.history_len must be >= 2"));
        }
        if self.tracker.entity_ttl_seconds == 0 {
            return Err(IdsError::config("tracker.entity_ttl_seconds must be > 0"));
        }
        if self.tracker.sweep_interval_seconds == 0 {
            return Err(IdsError::config(
                "tracker.sweep_interval_seconds must be > 0",
            ));
        }
        if !(self.tracker.grid_cell_m.is_finite() && self.tracker.grid_cell_m > 0.0) {
            return Err(IdsError::config("tracker.grid_cell_m must be positive"));
        }
        if self.window.window_size == 0 {
            return Err(IdsError::config("window.window_size must be >= 1"));
        }
        if self.window.window_step == 0 {
            return Err(IdsError::config("window.window_step must be >= 1"));
        }
        if self.window.window_step > self.window.window_size {
            // step > size would leave messages between windows unassigned,
            // breaking the every-message-in-exactly-one-window guarantee
            return Err(IdsError::config(
                "window.window_step must not exceed window.window_size",
            ));
        }
        if !(0.0..=1.0).contains(&self.decision.default_threshold) {
            return Err(IdsError::config(
                "decision.default_threshold must be in [0, 1]",
            ));
        }
        for (label, t) in &self.decision.per_class_threshold {
            if !(0.0..=1.0).contains(t) {
                return Err(IdsError::config(format!(
                    "decision.per_class_threshold[{label}] must be in [0, 1]"
                )));
            }
        }
        if self.decision.hysteresis_n == 0 || self.decision.hysteresis_k == 0 {
            return Err(IdsError::config("hysteresis_n and hysteresis_k must be >= 1"));
        }
        if self.decision.hysteresis_n > self.decision.hysteresis_k {
            return Err(IdsError::config(
                "decision.hysteresis_n must not exceed hysteresis_k",
            ));
        }
        if self.features.max_plausible_speed_mps <= 0.0 {
            return Err(IdsError::config(
                "features.max_plausible_speed_mps must be positive",
            ));
        }
        if self.features.rate_saturation_hz <= 0.0 {
            return Err(IdsError::config(
                "features.rate_saturation_hz must be positive",
            ));
        }
        Ok(())
    }
}
