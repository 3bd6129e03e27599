//! Canonical in-memory V2I message model and label taxonomy.
//! Timestamp and position are attacker-controlled inputs to the feature
//! extractor, never ground truth about the sender.

use crate::error::IdsError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Planar position in a local reference frame (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One V2I message (e.g. a periodic status beacon). Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub msg_id: String,
    /// Opaque sender identity. A Sybil attacker mints these freely.
    pub sender_id: String,
    /// Claimed timestamp, milliseconds. Untrusted.
    pub timestamp_ms: i64,
    pub position: Position,
    /// Reported speed, m/s. Untrusted.
    pub speed: f64,
    /// Reported heading, degrees [0, 360).
    pub heading: f64,
    /// Message sequence number as claimed by the sender.
    pub seq: u64,
    /// Free-form protocol fields.
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn new(
        sender_id: impl Into<String>,
        timestamp_ms: i64,
        position: Position,
        speed: f64,
        heading: f64,
        seq: u64,
    ) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            timestamp_ms,
            position,
            speed,
            heading,
            seq,
            payload: serde_json::Map::new(),
        }
    }

    /// Structural validation: mandatory fields present and representable.
    /// Fabricating defaults here would corrupt downstream feature statistics,
    /// so a failing message is rejected outright (MalformedMessage).
    ///
    /// Values that parse but look physically wrong (absurd speed, out-of-range
    /// payload fields) are *not* rejected: they are attack signal and feed the
    /// protocol-sanity features instead.
    pub fn validate(&self) -> Result<(), IdsError> {
        if self.sender_id.is_empty() {
            return Err(IdsError::malformed("empty sender_id"));
        }
        if self.timestamp_ms <= 0 {
            return Err(IdsError::malformed(format!(
                "non-positive timestamp {}",
                self.timestamp_ms
            )));
        }
        if !self.position.x.is_finite() || !self.position.y.is_finite() {
            return Err(IdsError::malformed("non-finite position"));
        }
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(IdsError::malformed(format!("invalid speed {}", self.speed)));
        }
        if !self.heading.is_finite() {
            return Err(IdsError::malformed("non-finite heading"));
        }
        Ok(())
    }
}

/// Classification labels: benign plus the attack taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Benign,
    PositionFalsification,
    Sybil,
    Dos,
    Replay,
    DataInjection,
}

impl Label {
    pub const ALL: [Label; 6] = [
        Label::Benign,
        Label::PositionFalsification,
        Label::Sybil,
        Label::Dos,
        Label::Replay,
        Label::DataInjection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Benign => "benign",
            Label::PositionFalsification => "position_falsification",
            Label::Sybil => "sybil",
            Label::Dos => "dos",
            Label::Replay => "replay",
            Label::DataInjection => "data_injection",
        }
    }

    pub fn index(&self) -> usize {
        Label::ALL.iter().position(|l| l == self).unwrap_or(0)
    }

    pub fn is_attack(&self) -> bool {
        *self != Label::Benign
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
