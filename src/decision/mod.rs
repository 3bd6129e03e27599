//! Decision & alerting policy: per-class confidence thresholds plus N-of-K
//! hysteresis, so one flapping window never becomes an alert, and cooldown
//! suppression so one sustained attack never becomes an alert storm.
//!
//! Per-entity state machine: Unknown -> Monitoring -> Alerted -> Cooldown ->
//! Monitoring. Eviction destroys the state (terminal).

use crate::config::DecisionConfig;
use crate::message::Label;
use crate::window::Window;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    /// No windows observed yet for this entity.
    Unknown,
    /// Default steady state: accumulating hysteresis evidence.
    Monitoring,
    /// Hysteresis satisfied; the verdict is being emitted.
    Alerted,
    /// Alert emitted; duplicates for the same attack type suppressed.
    Cooldown,
}

/// Terminal output of the pipeline: one actionable alert.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub verdict_id: String,
    pub entity_id: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub label: Label,
    pub confidence: f32,
    /// Top aggregated features that triggered the classification.
    pub evidence: Vec<(String, f32)>,
}

struct EntityAlertState {
    phase: AlertPhase,
    /// Qualifying attack label per recent window (None = did not qualify),
    /// bounded to the last K windows.
    recent: VecDeque<Option<Label>>,
    cooldown_until_ms: i64,
    /// Stream time of the last non-qualifying (benign-looking) window run
    /// start while in cooldown; sustained benign ends cooldown early.
    benign_since_ms: Option<i64>,
    alerted_label: Option<Label>,
}

impl EntityAlertState {
    fn new() -> Self {
        Self {
            phase: AlertPhase::Unknown,
            recent: VecDeque::new(),
            cooldown_until_ms: 0,
            benign_since_ms: None,
            alerted_label: None,
        }
    }
}

pub struct DecisionPolicy {
    config: DecisionConfig,
    states: HashMap<String, EntityAlertState>,
}

impl DecisionPolicy {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn phase(&self, entity_id: &str) -> AlertPhase {
        self.states
            .get(entity_id)
            .map(|s| s.phase)
            .unwrap_or(AlertPhase::Unknown)
    }

    /// Fold one classified window into the entity's alert state; returns a
    /// Verdict when (and only when) the hysteresis rule is newly satisfied.
    pub fn decide(
        &mut self,
        window: &Window,
        label: Label,
        confidence: f32,
        stream_now_ms: i64,
    ) -> Option<Verdict> {
        let k = self.config.hysteresis_k as usize;
        let n = self.config.hysteresis_n as usize;
        let cooldown_ms = self.config.cooldown_seconds as i64 * 1000;

        let qualifies = label.is_attack() && confidence >= self.config.threshold_for(label);

        let state = self
            .states
            .entry(window.entity_id.clone())
            .or_insert_with(EntityAlertState::new);

        if state.phase == AlertPhase::Unknown {
            state.phase = AlertPhase::Monitoring;
        }

        state.recent.push_back(qualifies.then_some(label));
        while state.recent.len() > k {
            state.recent.pop_front();
        }

        match state.phase {
            AlertPhase::Cooldown => {
                if qualifies {
                    state.benign_since_ms = None;
                } else if state.benign_since_ms.is_none() {
                    state.benign_since_ms = Some(stream_now_ms);
                }

                let benign_long_enough = state
                    .benign_since_ms
                    .map(|since| stream_now_ms - since >= cooldown_ms)
                    .unwrap_or(false);
                if stream_now_ms >= state.cooldown_until_ms || benign_long_enough {
                    state.phase = AlertPhase::Monitoring;
                    state.alerted_label = None;
                    state.benign_since_ms = None;
                    // the transition window's own outcome seeds the next
                    // hysteresis run; only the pre-cooldown history is dropped
                    let carried = state.recent.pop_back().unwrap_or(None);
                    state.recent.clear();
                    state.recent.push_back(carried);
                    return monitor(state, window, confidence, n, cooldown_ms, stream_now_ms);
                }

                // A *different* attack type can still escalate mid-cooldown.
                if let Some(candidate) = dominant_qualifying(&state.recent, n) {
                    if Some(candidate) != state.alerted_label {
                        let verdict = make_verdict(window, candidate, confidence);
                        state.alerted_label = Some(candidate);
                        state.cooldown_until_ms = stream_now_ms + cooldown_ms;
                        state.recent.clear();
                        return Some(verdict);
                    }
                }
                None
            }
            AlertPhase::Monitoring | AlertPhase::Alerted | AlertPhase::Unknown => {
                monitor(state, window, confidence, n, cooldown_ms, stream_now_ms)
            }
        }
    }

    /// Entity evicted: its alert state is destroyed (terminal transition).
    pub fn evict(&mut self, entity_id: &str) {
        self.states.remove(entity_id);
    }

    pub fn tracked_entities(&self) -> usize {
        self.states.len()
    }
}

/// Monitoring-phase evaluation: Monitoring -> Alerted (hysteresis satisfied)
/// -> emit -> Cooldown, all within one window.
fn monitor(
    state: &mut EntityAlertState,
    window: &Window,
    confidence: f32,
    n: usize,
    cooldown_ms: i64,
    stream_now_ms: i64,
) -> Option<Verdict> {
    let candidate = dominant_qualifying(&state.recent, n)?;
    state.phase = AlertPhase::Alerted;
    let verdict = make_verdict(window, candidate, confidence);
    state.phase = AlertPhase::Cooldown;
    state.alerted_label = Some(candidate);
    state.cooldown_until_ms = stream_now_ms + cooldown_ms;
    state.benign_since_ms = None;
    state.recent.clear();
    Some(verdict)
}

/// The attack label holding at least `n` of the retained windows, if any.
/// Ties resolve to the most recent qualifying label for determinism.
fn dominant_qualifying(recent: &VecDeque<Option<Label>>, n: usize) -> Option<Label> {
    let mut counts: HashMap<Label, usize> = HashMap::new();
    for l in recent.iter().flatten() {
        *counts.entry(*l).or_insert(0) += 1;
    }
    let mut best: Option<Label> = None;
    let mut best_count = 0usize;
    for l in recent.iter().flatten() {
        let c = counts[l];
        if c >= n && c >= best_count {
            best = Some(*l);
            best_count = c;
        }
    }
    best
}

fn make_verdict(window: &Window, label: Label, confidence: f32) -> Verdict {
    Verdict {
        verdict_id: Uuid::new_v4().to_string(),
        entity_id: window.entity_id.clone(),
        window_start_ms: window.start_ms,
        window_end_ms: window.end_ms,
        label,
        confidence,
        evidence: window.top_features(3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecisionConfig;
    use crate::features::{FeatureVector, NUM_FEATURES};
    use crate::window::WindowAggregator;
    use crate::config::{WindowConfig, WindowMode};

    fn window_for(entity: &str, ts: i64) -> Window {
        let mut agg = WindowAggregator::new(WindowConfig {
            mode: WindowMode::Count,
            window_size: 1,
            window_step: 1,
        });
        agg.push(FeatureVector {
            values: vec![0.5; NUM_FEATURES],
            entity_id: entity.to_string(),
            timestamp_ms: ts,
            msg_id: format!("m{ts}"),
        })
        .expect("size-1 window seals immediately")
    }

    fn policy() -> DecisionPolicy {
        DecisionPolicy::new(DecisionConfig::default()) // 3-of-5, 0.75, 60 s
    }

    #[test]
    fn below_threshold_never_alerts() {
        let mut p = policy();
        for i in 0..20i64 {
            let w = window_for("v1", 1_000 + i * 100);
            assert!(p
                .decide(&w, Label::Dos, 0.5, 1_000 + i * 100)
                .is_none());
        }
        assert_eq!(p.phase("v1"), AlertPhase::Monitoring);
    }

    #[test]
    fn two_of_five_insufficient() {
        let mut p = policy();
        let seq = [0.9, 0.1, 0.9, 0.1, 0.1, 0.1, 0.9, 0.1, 0.1, 0.1];
        for (i, conf) in seq.into_iter().enumerate() {
            let w = window_for("v1", 1_000 + i as i64 * 100);
            let label = if conf > 0.75 { Label::Dos } else { Label::Benign };
            assert!(p.decide(&w, label, conf, 1_000 + i as i64 * 100).is_none());
        }
    }

    #[test]
    fn three_of_five_emits_exactly_one() {
        let mut p = policy();
        let mut verdicts = 0;
        // qualifying at windows 0, 2, 4: hysteresis met at window 4
        let seq = [0.9, 0.1, 0.9, 0.1, 0.9];
        for (i, conf) in seq.into_iter().enumerate() {
            let w = window_for("v1", 1_000 + i as i64 * 100);
            let label = if conf > 0.75 { Label::Dos } else { Label::Benign };
            if p.decide(&w, label, conf, 1_000 + i as i64 * 100).is_some() {
                verdicts += 1;
            }
        }
        assert_eq!(verdicts, 1);
        assert_eq!(p.phase("v1"), AlertPhase::Cooldown);
    }

    #[test]
    fn duplicate_alerts_suppressed_in_cooldown() {
        let mut p = policy();
        let mut verdicts = 0;
        for i in 0..30i64 {
            let w = window_for("v1", 1_000 + i * 100);
            if p.decide(&w, Label::Dos, 0.95, 1_000 + i * 100).is_some() {
                verdicts += 1;
            }
        }
        // 3 s of stream time < 60 s cooldown: the storm yields one alert
        assert_eq!(verdicts, 1);
    }

    #[test]
    fn different_attack_type_escalates_during_cooldown() {
        let mut p = policy();
        let mut labels_seen = Vec::new();
        for i in 0..3i64 {
            let w = window_for("v1", 1_000 + i * 100);
            if let Some(v) = p.decide(&w, Label::Dos, 0.95, 1_000 + i * 100) {
                labels_seen.push(v.label);
            }
        }
        for i in 3..6i64 {
            let w = window_for("v1", 1_000 + i * 100);
            if let Some(v) = p.decide(&w, Label::Sybil, 0.95, 1_000 + i * 100) {
                labels_seen.push(v.label);
            }
        }
        assert_eq!(labels_seen, vec![Label::Dos, Label::Sybil]);
    }

    #[test]
    fn cooldown_expiry_returns_to_monitoring() {
        let mut p = policy();
        for i in 0..3i64 {
            let w = window_for("v1", 1_000 + i * 100);
            p.decide(&w, Label::Dos, 0.95, 1_000 + i * 100);
        }
        assert_eq!(p.phase("v1"), AlertPhase::Cooldown);
        // 61 s later (stream time), a benign window flips us back
        let w = window_for("v1", 62_300);
        assert!(p.decide(&w, Label::Benign, 0.9, 62_300).is_none());
        assert_eq!(p.phase("v1"), AlertPhase::Monitoring);
    }

    #[test]
    fn window_at_cooldown_expiry_counts_toward_next_run() {
        let mut p = policy();
        for i in 0..3i64 {
            let w = window_for("v1", 1_000 + i * 100);
            p.decide(&w, Label::Dos, 0.95, 1_000 + i * 100);
        }
        assert_eq!(p.phase("v1"), AlertPhase::Cooldown);
        // attack resumes after the 60 s cooldown lapses; the window that
        // triggers the transition is the first of the next 3-of-5 run
        let mut emitted_at = None;
        for i in 0..5i64 {
            let ts = 62_000 + i * 100;
            let w = window_for("v1", ts);
            if p.decide(&w, Label::Dos, 0.95, ts).is_some() {
                emitted_at = Some(i);
                break;
            }
        }
        assert_eq!(emitted_at, Some(2));
    }

    #[test]
    fn eviction_destroys_state() {
        let mut p = policy();
        let w = window_for("v1", 1_000);
        p.decide(&w, Label::Benign, 0.9, 1_000);
        assert_eq!(p.phase("v1"), AlertPhase::Monitoring);
        p.evict("v1");
        assert_eq!(p.phase("v1"), AlertPhase::Unknown);
        assert_eq!(p.tracked_entities(), 0);
    }

    #[test]
    fn entities_do_not_share_hysteresis() {
        let mut p = policy();
        let mut verdicts = 0;
        // alternate two entities; each only reaches 2 qualifying windows
        for i in 0..4i64 {
            let id = if i % 2 == 0 { "a" } else { "b" };
            let w = window_for(id, 1_000 + i * 100);
            if p.decide(&w, Label::Dos, 0.95, 1_000 + i * 100).is_some() {
                verdicts += 1;
            }
        }
        assert_eq!(verdicts, 0);
    }
}
