//! Per-entity rolling state keyed by sender identity: bounded message history,
//! incremental running statistics, idle-TTL eviction, and a coarse position
//! grid that supports the Sybil-oriented neighborhood features.
//!
//! All clocks here are stream time (the maximum claimed timestamp observed),
//! so replaying a capture is deterministic.

use crate::config::TrackerConfig;
use crate::message::{Message, Position};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

/// One retained observation from an entity's past.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp_ms: i64,
    pub position: Position,
    pub speed: f64,
    pub heading: f64,
    pub seq: u64,
    /// SHA-256 of the canonical payload encoding, for replay scoring.
    pub payload_digest: [u8; 32],
}

/// Numerically stable incremental mean/variance (Welford).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunningStats {
    pub count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Mutable per-entity state, owned exclusively by the tracker.
#[derive(Debug)]
struct EntityState {
    history: VecDeque<HistoryEntry>,
    interval_ms: RunningStats,
    speed: RunningStats,
    heading_delta: RunningStats,
    last_claimed_ts_ms: i64,
    last_seen_stream_ms: i64,
    cell: (i64, i64),
}

/// Immutable view handed to the feature extractor. Everything the extractor
/// needs is precomputed here so extraction stays a pure function.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub entity_id: String,
    /// The observation immediately preceding the current message, if any.
    pub prev: Option<HistoryEntry>,
    /// History length including the current message.
    pub history_len: usize,
    pub interval_mean_ms: f64,
    pub interval_std_ms: f64,
    pub interval_count: u64,
    /// Claimed timestamp earlier than the previous one. Attack-relevant
    /// signal, not an error.
    pub out_of_order: bool,
    /// Messages per second over the retained history span.
    pub msg_rate_hz: f64,
    /// How many prior history entries carry the current payload digest.
    pub replay_hits: u32,
    /// Entities first seen in this message's grid cell within the recency
    /// horizon (the current entity included if it is new).
    pub new_ids_in_cell: u32,
    /// Entities currently resident in this message's grid cell.
    pub cell_population: u32,
}

/// Entity State Tracker: `update` per message, `sweep` on a timer.
pub struct EntityTracker {
    config: TrackerConfig,
    entities: HashMap<String, EntityState>,
    /// cell -> entities whose last position falls in the cell
    cells: HashMap<(i64, i64), HashSet<String>>,
    /// cell -> recent first-sighting timestamps (stream time, bounded)
    first_sightings: HashMap<(i64, i64), VecDeque<i64>>,
    identity_window_ms: i64,
}

impl EntityTracker {
    pub fn new(config: TrackerConfig, identity_window_seconds: u64) -> Self {
        Self {
            config,
            entities: HashMap::new(),
            cells: HashMap::new(),
            first_sightings: HashMap::new(),
            identity_window_ms: identity_window_seconds as i64 * 1000,
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn cell_of(&self, pos: &Position) -> (i64, i64) {
        (
            (pos.x / self.config.grid_cell_m).floor() as i64,
            (pos.y / self.config.grid_cell_m).floor() as i64,
        )
    }

    /// Record the message into the sender's state and return a snapshot for
    /// feature extraction. A first message from an unknown (or evicted)
    /// identity creates fresh state; never an error.
    pub fn update(&mut self, msg: &Message, stream_now_ms: i64) -> EntitySnapshot {
        let cell = self.cell_of(&msg.position);
        let digest = payload_digest(msg);

        let is_new = !self.entities.contains_key(&msg.sender_id);
        if is_new {
            let sightings = self.first_sightings.entry(cell).or_default();
            sightings.push_back(stream_now_ms);
            // Bound per-cell sighting memory independently of entity count so
            // a Sybil flood cannot grow it without limit.
            while sightings.len() > 4 * self.config.history_len {
                sightings.pop_front();
            }
        }

        let state = self
            .entities
            .entry(msg.sender_id.clone())
            .or_insert_with(|| EntityState {
                history: VecDeque::with_capacity(self.config.history_len),
                interval_ms: RunningStats::default(),
                speed: RunningStats::default(),
                heading_delta: RunningStats::default(),
                last_claimed_ts_ms: msg.timestamp_ms,
                last_seen_stream_ms: stream_now_ms,
                cell,
            });

        let prev = state.history.back().cloned();
        let out_of_order = prev
            .as_ref()
            .map(|p| msg.timestamp_ms < p.timestamp_ms)
            .unwrap_or(false);

        if let Some(ref p) = prev {
            let dt = (msg.timestamp_ms - p.timestamp_ms).abs() as f64;
            state.interval_ms.push(dt);
            let dh = heading_difference(p.heading, msg.heading);
            state.heading_delta.push(dh);
        }
        state.speed.push(msg.speed);

        let replay_hits = state
            .history
            .iter()
            .filter(|h| h.payload_digest == digest)
            .count() as u32;

        state.history.push_back(HistoryEntry {
            timestamp_ms: msg.timestamp_ms,
            position: msg.position,
            speed: msg.speed,
            heading: msg.heading,
            seq: msg.seq,
            payload_digest: digest,
        });
        while state.history.len() > self.config.history_len {
            state.history.pop_front();
        }

        state.last_claimed_ts_ms = state.last_claimed_ts_ms.max(msg.timestamp_ms);
        state.last_seen_stream_ms = stream_now_ms;

        let msg_rate_hz = {
            let span_ms = state
                .history
                .iter()
                .map(|h| h.timestamp_ms)
                .max()
                .unwrap_or(msg.timestamp_ms)
                - state
                    .history
                    .iter()
                    .map(|h| h.timestamp_ms)
                    .min()
                    .unwrap_or(msg.timestamp_ms);
            if span_ms > 0 {
                (state.history.len() as f64 - 1.0).max(0.0) / (span_ms as f64 / 1000.0)
            } else {
                0.0
            }
        };

        let snapshot_core = (
            state.history.len(),
            state.interval_ms.mean(),
            state.interval_ms.std_dev(),
            state.interval_ms.count,
        );

        // Move the entity between cells if its reported position wandered.
        let old_cell = state.cell;
        state.cell = cell;
        if old_cell != cell {
            if let Some(set) = self.cells.get_mut(&old_cell) {
                set.remove(&msg.sender_id);
                if set.is_empty() {
                    self.cells.remove(&old_cell);
                }
            }
        }
        self.cells
            .entry(cell)
            .or_default()
            .insert(msg.sender_id.clone());

        let horizon = stream_now_ms - self.identity_window_ms;
        let new_ids_in_cell = self
            .first_sightings
            .get(&cell)
            .map(|s| s.iter().filter(|&&ts| ts >= horizon).count() as u32)
            .unwrap_or(0);
        let cell_population = self.cells.get(&cell).map(|s| s.len() as u32).unwrap_or(0);

        EntitySnapshot {
            entity_id: msg.sender_id.clone(),
            prev,
            history_len: snapshot_core.0,
            interval_mean_ms: snapshot_core.1,
            interval_std_ms: snapshot_core.2,
            interval_count: snapshot_core.3,
            out_of_order,
            msg_rate_hz,
            replay_hits,
            new_ids_in_cell,
            cell_population,
        }
    }

    /// Evict entities idle beyond the TTL; returns the evicted ids so the
    /// caller can flush their partial windows and destroy decision state.
    pub fn sweep(&mut self, stream_now_ms: i64) -> Vec<String> {
        let ttl_ms = self.config.entity_ttl_seconds as i64 * 1000;
        let mut evicted = Vec::new();
        self.entities.retain(|id, state| {
            if stream_now_ms - state.last_seen_stream_ms > ttl_ms {
                evicted.push((id.clone(), state.cell));
                false
            } else {
                true
            }
        });
        for (id, cell) in &evicted {
            if let Some(set) = self.cells.get_mut(cell) {
                set.remove(id);
                if set.is_empty() {
                    self.cells.remove(cell);
                }
            }
        }
        // Drop stale sighting records while we are here.
        let horizon = stream_now_ms - self.identity_window_ms;
        self.first_sightings.retain(|_, sightings| {
            while sightings.front().map(|&ts| ts < horizon).unwrap_or(false) {
                sightings.pop_front();
            }
            !sightings.is_empty()
        });
        evicted.into_iter().map(|(id, _)| id).collect()
    }
}

/// Smallest absolute difference between two headings, in degrees [0, 180].
pub fn heading_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

fn payload_digest(msg: &Message) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(msg.seq.to_le_bytes());
    // serde_json::Map preserves insertion order; digest over the canonical
    // serialization is stable for identical payloads.
    if let Ok(bytes) = serde_json::to_vec(&msg.payload) {
        hasher.update(&bytes);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
