//! Deterministic per-message pipeline: validate, track, extract, window,
//! classify, decide. One instance owns one partition of the entity space; all
//! clocks run on stream time so replaying a capture reproduces the same
//! verdict sequence.

use crate::config::IdsConfig;
use crate::decision::{DecisionPolicy, Verdict};
use crate::error::IdsError;
use crate::features::FeatureExtractor;
use crate::message::Message;
use crate::model::Classifier;
use crate::tracker::EntityTracker;
use crate::window::{Window, WindowAggregator};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct IdsPipeline {
    tracker: EntityTracker,
    extractor: FeatureExtractor,
    windows: WindowAggregator,
    decision: DecisionPolicy,
    classifier: Option<Arc<dyn Classifier>>,
    /// Maximum claimed timestamp observed so far.
    stream_now_ms: i64,
    last_sweep_ms: i64,
    sweep_interval_ms: i64,
    processed: u64,
    rejected: u64,
}

impl IdsPipeline {
    pub fn new(config: &IdsConfig) -> Self {
        Self {
            tracker: EntityTracker::new(
                config.tracker.clone(),
                config.features.identity_window_seconds,
            ),
            extractor: FeatureExtractor::new(config.features.clone()),
            windows: WindowAggregator::new(config.window.clone()),
            decision: DecisionPolicy::new(config.decision.clone()),
            classifier: None,
            stream_now_ms: 0,
            last_sweep_ms: 0,
            sweep_interval_ms: config.tracker.sweep_interval_seconds as i64 * 1000,
            processed: 0,
            rejected: 0,
        }
    }

    /// Swap the model atomically between messages. The next window sealed
    /// classifies against the new model.
    pub fn install_model(&mut self, classifier: Arc<dyn Classifier>) {
        info!(family = classifier.family(), "model installed");
        self.classifier = Some(classifier);
    }

    pub fn has_model(&self) -> bool {
        self.classifier.is_some()
    }

    /// Feed one message through the full chain. Malformed input is rejected
    /// with an error and leaves every stage untouched.
    pub fn process(&mut self, msg: &Message) -> Result<Vec<Verdict>, IdsError> {
        if let Err(e) = msg.validate() {
            self.rejected += 1;
            warn!(sender = %msg.sender_id, error = %e, "message rejected");
            return Err(e);
        }
        if self.classifier.is_none() {
            return Err(IdsError::ModelNotTrained);
        }

        if msg.timestamp_ms > self.stream_now_ms {
            self.stream_now_ms = msg.timestamp_ms;
        }
        self.processed += 1;

        let snapshot = self.tracker.update(msg, self.stream_now_ms);
        let fv = self.extractor.extract(msg, &snapshot);

        let mut verdicts = Vec::new();
        if let Some(window) = self.windows.push(fv) {
            debug!(
                entity = %window.entity_id,
                len = window.len(),
                "window sealed"
            );
            if let Some(v) = self.classify_and_decide(&window) {
                verdicts.push(v);
            }
        }

        if self.stream_now_ms - self.last_sweep_ms >= self.sweep_interval_ms {
            verdicts.extend(self.sweep());
        }
        Ok(verdicts)
    }

    /// Evict idle entities: flush their partial windows through classification
    /// and decision, then destroy their alert state.
    pub fn sweep(&mut self) -> Vec<Verdict> {
        self.last_sweep_ms = self.stream_now_ms;
        let evicted = self.tracker.sweep(self.stream_now_ms);
        let mut verdicts = Vec::new();
        for entity_id in &evicted {
            if let Some(window) = self.windows.flush(entity_id) {
                debug!(entity = %entity_id, len = window.len(), "partial window flushed on eviction");
                if let Some(v) = self.classify_and_decide(&window) {
                    verdicts.push(v);
                }
            }
            self.decision.evict(entity_id);
        }
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "entities evicted");
        }
        verdicts
    }

    /// End of stream: flush every open window so no observed message is lost.
    pub fn finish(&mut self) -> Vec<Verdict> {
        let mut verdicts = Vec::new();
        for window in self.windows.flush_all() {
            if let Some(v) = self.classify_and_decide(&window) {
                verdicts.push(v);
            }
        }
        info!(
            processed = self.processed,
            rejected = self.rejected,
            "stream finished"
        );
        verdicts
    }

    fn classify_and_decide(&mut self, window: &Window) -> Option<Verdict> {
        let classifier = self.classifier.as_ref()?;
        let (label, confidence) = classifier.predict(window.aggregate());
        debug!(
            entity = %window.entity_id,
            label = %label,
            confidence,
            "window classified"
        );
        let verdict = self
            .decision
            .decide(window, label, confidence, self.stream_now_ms)?;
        info!(
            entity = %verdict.entity_id,
            label = %verdict.label,
            confidence = verdict.confidence,
            "verdict emitted"
        );
        Some(verdict)
    }

    pub fn stream_now_ms(&self) -> i64 {
        self.stream_now_ms
    }

    pub fn entity_count(&self) -> usize {
        self.tracker.entity_count()
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Label, Position};
    use crate::model::{TrainingReport, TrainingSample};
    use std::path::Path;

    /// Flags any window whose aggregated implied-speed feature saturates.
    struct SpeedGate;

    impl Classifier for SpeedGate {
        fn fit(&mut self, _: &[TrainingSample]) -> Result<TrainingReport, IdsError> {
            unimplemented!()
        }
        fn predict(&self, features: &[f32]) -> (Label, f32) {
            if features.first().copied().unwrap_or(0.0) > 0.9 {
                (Label::PositionFalsification, 0.95)
            } else {
                (Label::Benign, 0.9)
            }
        }
        fn save(&self, _: &Path) -> Result<(), IdsError> {
            unimplemented!()
        }
        fn family(&self) -> &'static str {
            "speed-gate"
        }
    }

    fn msg(sender: &str, ts: i64, x: f64, seq: u64) -> Message {
        Message::new(
            sender.to_string(),
            ts,
            Position { x, y: 0.0 },
            10.0,
            90.0,
            seq,
        )
    }

    fn pipeline() -> IdsPipeline {
        let mut cfg = IdsConfig::default();
        cfg.window.window_size = 2;
        cfg.window.window_step = 2;
        cfg.decision.hysteresis_n = 1;
        cfg.decision.hysteresis_k = 1;
        let mut p = IdsPipeline::new(&cfg);
        p.install_model(Arc::new(SpeedGate));
        p
    }

    fn drive(p: &mut IdsPipeline, messages: &[Message]) -> Vec<Verdict> {
        let mut out = Vec::new();
        for m in messages {
            out.extend(p.process(m).unwrap());
        }
        out.extend(p.finish());
        out
    }

    #[test]
    fn no_model_is_an_error() {
        let cfg = IdsConfig::default();
        let mut p = IdsPipeline::new(&cfg);
        let m = msg("v1", 1_000, 0.0, 1);
        assert!(matches!(p.process(&m), Err(IdsError::ModelNotTrained)));
    }

    #[test]
    fn malformed_message_rejected_without_side_effects() {
        let mut p = pipeline();
        let mut bad = msg("v1", 1_000, 0.0, 1);
        bad.timestamp_ms = 0;
        assert!(p.process(&bad).is_err());
        assert_eq!(p.entity_count(), 0);
        assert_eq!(p.rejected(), 1);
        assert_eq!(p.processed(), 0);
    }

    #[test]
    fn benign_stream_produces_no_verdicts() {
        let mut p = pipeline();
        let messages: Vec<Message> = (0..50)
            .map(|i| msg("v1", 1_000 + i * 100, i as f64, i as u64))
            .collect();
        let verdicts = drive(&mut p, &messages);
        assert!(verdicts.is_empty());
    }

    #[test]
    fn teleport_yields_position_falsification() {
        let mut p = pipeline();
        let mut messages: Vec<Message> = (0..4)
            .map(|i| msg("v1", 1_000 + i * 100, i as f64, i as u64))
            .collect();
        // two consecutive 50 km hops, each in 100 ms
        messages.push(msg("v1", 1_400, 50_000.0, 4));
        messages.push(msg("v1", 1_500, 100_000.0, 5));
        let verdicts = drive(&mut p, &messages);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].label, Label::PositionFalsification);
        assert!(verdicts[0]
            .evidence
            .iter()
            .any(|(name, _)| name == "implied_speed"));
    }

    #[test]
    fn identical_streams_yield_identical_verdict_sequences() {
        let messages: Vec<Message> = (0..20)
            .map(|i| {
                let x = if i == 10 { 90_000.0 } else { i as f64 };
                msg("v1", 1_000 + i * 100, x, i as u64)
            })
            .collect();
        let a = drive(&mut pipeline(), &messages);
        let b = drive(&mut pipeline(), &messages);
        assert_eq!(a.len(), b.len());
        for (va, vb) in a.iter().zip(b.iter()) {
            assert_eq!(va.entity_id, vb.entity_id);
            assert_eq!(va.label, vb.label);
            assert_eq!(va.confidence, vb.confidence);
            assert_eq!(va.window_start_ms, vb.window_start_ms);
        }
    }

    #[test]
    fn sweep_flushes_partial_windows_of_idle_entities() {
        let mut cfg = IdsConfig::default();
        cfg.window.window_size = 10;
        cfg.window.window_step = 10;
        cfg.tracker.entity_ttl_seconds = 2;
        cfg.tracker.sweep_interval_seconds = 1;
        cfg.decision.hysteresis_n = 1;
        cfg.decision.hysteresis_k = 1;
        let mut p = IdsPipeline::new(&cfg);
        p.install_model(Arc::new(SpeedGate));

        // v1 teleports once, then goes silent while v2 keeps talking
        p.process(&msg("v1", 1_000, 0.0, 1)).unwrap();
        p.process(&msg("v1", 1_100, 80_000.0, 2)).unwrap();
        let mut verdicts = Vec::new();
        for i in 0..50i64 {
            verdicts.extend(p.process(&msg("v2", 1_200 + i * 100, 0.0, i as u64)).unwrap());
        }
        // v1 evicted mid-stream, its two-message partial window classified
        assert!(verdicts
            .iter()
            .any(|v| v.entity_id == "v1" && v.label == Label::PositionFalsification));
        assert_eq!(p.entity_count(), 1);
    }

    #[test]
    fn stream_time_ignores_walltime() {
        // Timestamps years in the past still drive eviction consistently.
        let mut cfg = IdsConfig::default();
        cfg.decision.hysteresis_n = 1;
        cfg.decision.hysteresis_k = 1;
        let mut p = IdsPipeline::new(&cfg);
        p.install_model(Arc::new(SpeedGate));
        let m = msg("v1", 86_400_000, 0.0, 1); // day one of the epoch
        p.process(&m).unwrap();
        assert_eq!(p.stream_now_ms(), 86_400_000);
    }
}
