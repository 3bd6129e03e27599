//! The extractor itself. Deterministic: same message + same snapshot always
//! yields the same vector, which is what makes replay testing possible.

use super::{FeatureVector, MISSING, NUM_FEATURES};
use crate::config::FeaturesConfig;
use crate::message::Message;
use crate::tracker::{heading_difference, EntitySnapshot};

// Normalization caps for raw values that have no config knob.
const NOMINAL_SPEED_MPS: f64 = 30.0;
const INTERARRIVAL_CAP_MS: f64 = 5_000.0;
const ZSCORE_CAP: f64 = 6.0;
const SEQ_GAP_CAP: f64 = 50.0;
const PAYLOAD_CHECKS: f64 = 4.0;

pub struct FeatureExtractor {
    config: FeaturesConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeaturesConfig) -> Self {
        Self { config }
    }

    /// Extract the fixed-width vector for one message.
    pub fn extract(&self, msg: &Message, snap: &EntitySnapshot) -> FeatureVector {
        let mut v = vec![MISSING; NUM_FEATURES];

        if self.config.kinematic {
            self.kinematic_features(msg, snap, &mut v);
        }
        if self.config.timing {
            self.timing_features(msg, snap, &mut v);
        }
        if self.config.identity {
            self.identity_features(snap, &mut v);
        }
        if self.config.protocol {
            self.protocol_features(msg, snap, &mut v);
        }

        FeatureVector {
            values: v,
            entity_id: msg.sender_id.clone(),
            timestamp_ms: msg.timestamp_ms,
            msg_id: msg.msg_id.clone(),
        }
    }

    /// Speed/position implied by two consecutive reports vs. reported
    /// velocity. Flags teleport-style position falsification.
    fn kinematic_features(&self, msg: &Message, snap: &EntitySnapshot, v: &mut [f32]) {
        let cap = self.config.max_plausible_speed_mps;
        let Some(ref prev) = snap.prev else {
            return; // no history: slots stay MISSING
        };
        let dt_s = (msg.timestamp_ms - prev.timestamp_ms).abs() as f64 / 1000.0;
        if dt_s <= 0.0 {
            // Two reports with the same claimed instant: any displacement is a
            // teleport by definition.
            let moved = msg.position.distance_to(&prev.position) > f64::EPSILON;
            v[0] = if moved { 1.0 } else { 0.0 };
            v[2] = v[0];
            return;
        }
        let implied = msg.position.distance_to(&prev.position) / dt_s;
        // implied_speed scales against ordinary cruising speed, teleport_ratio
        // against the physical plausibility cap; the slots diverge below cap
        v[0] = saturate(implied / NOMINAL_SPEED_MPS);
        v[1] = saturate((implied - msg.speed).abs() / cap);
        v[2] = saturate(implied / cap);
        v[3] = (heading_difference(prev.heading, msg.heading) / 180.0) as f32;
        let accel = (msg.speed - prev.speed).abs() / dt_s;
        v[4] = saturate(accel / self.config.max_plausible_accel_mps2);
    }

    /// Inter-arrival interval vs. the entity's own history. Flags flooding
    /// (tiny gaps, high rate) and stalling (huge gaps).
    fn timing_features(&self, msg: &Message, snap: &EntitySnapshot, v: &mut [f32]) {
        let Some(ref prev) = snap.prev else {
            return;
        };
        let gap_ms = (msg.timestamp_ms - prev.timestamp_ms).abs() as f64;
        v[5] = saturate(gap_ms / INTERARRIVAL_CAP_MS);
        if snap.interval_count >= 2 && snap.interval_std_ms > 0.0 {
            let z = ((gap_ms - snap.interval_mean_ms) / snap.interval_std_ms).abs();
            v[6] = saturate(z / ZSCORE_CAP);
        }
        v[7] = saturate(snap.msg_rate_hz / self.config.rate_saturation_hz);
    }

    /// Rate of new identities around the sender's reported position. A Sybil
    /// attacker mints many identities from roughly one place.
    fn identity_features(&self, snap: &EntitySnapshot, v: &mut [f32]) {
        let sat = self.config.identity_saturation.max(1) as f64;
        v[8] = saturate(snap.new_ids_in_cell as f64 / sat);
        v[9] = saturate(snap.cell_population as f64 / sat);
    }

    /// Protocol-field sanity: sequence gaps, out-of-range payload values,
    /// replayed payloads, timestamp regression.
    fn protocol_features(&self, msg: &Message, snap: &EntitySnapshot, v: &mut [f32]) {
        if let Some(ref prev) = snap.prev {
            let expected = prev.seq.wrapping_add(1);
            let gap = if msg.seq >= expected {
                msg.seq - expected
            } else {
                expected - msg.seq
            };
            v[10] = saturate(gap as f64 / SEQ_GAP_CAP);
            let hist = (snap.history_len.saturating_sub(1)).max(1) as f64;
            v[12] = saturate(snap.replay_hits as f64 / hist);
            v[13] = if snap.out_of_order { 1.0 } else { 0.0 };
        }
        v[11] = saturate(self.payload_violations(msg) / PAYLOAD_CHECKS);
    }

    /// Count parseable-but-implausible fields. These are deliberately *not*
    /// MalformedMessage: a forged-but-well-formed field is signal.
    fn payload_violations(&self, msg: &Message) -> f64 {
        let mut violations = 0u32;
        if msg.speed > 1.5 * self.config.max_plausible_speed_mps {
            violations += 1;
        }
        if !(0.0..360.0).contains(&msg.heading) {
            violations += 1;
        }
        if msg.position.x.abs() > 1.0e7 || msg.position.y.abs() > 1.0e7 {
            violations += 1;
        }
        let has_bad_number = msg.payload.values().any(|val| {
            val.as_f64().map(|f| !f.is_finite()).unwrap_or(false)
        });
        if has_bad_number {
            violations += 1;
        }
        f64::from(violations)
    }
}

fn saturate(x: f64) -> f32 {
    x.clamp(0.0, 1.0) as f32
}
