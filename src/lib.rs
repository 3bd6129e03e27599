//! V2I-IDS — Streaming intrusion detection for vehicle-to-infrastructure
//! networks.
//!
//! Modular structure:
//! - [`message`] — Wire message model, validation, attack labels
//! - [`tracker`] — Per-entity rolling state and eviction
//! - [`features`] — Per-message feature extraction
//! - [`window`] — Per-entity windowing and aggregation
//! - [`model`] — Pluggable classifiers (centroid, ONNX)
//! - [`decision`] — Thresholds, hysteresis, cooldown, verdicts
//! - [`pipeline`] — Deterministic per-partition processing chain
//! - [`runtime`] — Entity-sharded worker runtime
//! - [`source`] / [`sink`] — JSONL intake, JSONL/HTTP verdict delivery
//! - [`storage`] — Encrypted local verdict store
//! - [`logging`] — Structured JSON logging

pub mod config;
pub mod decision;
pub mod error;
pub mod features;
pub mod logging;
pub mod message;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod storage;
pub mod tracker;
pub mod window;

pub use config::IdsConfig;
pub use decision::{DecisionPolicy, Verdict};
pub use error::IdsError;
pub use features::{FeatureExtractor, FeatureVector};
pub use message::{Label, Message, Position};
pub use model::{CentroidClassifier, Classifier, OnnxClassifier};
pub use pipeline::IdsPipeline;
pub use runtime::PartitionedRuntime;
pub use sink::{HttpSink, JsonlSink, VerdictSink};
pub use source::{JsonlSource, MessageSource};
pub use storage::VerdictStore;
pub use logging::StructuredLogger;
pub use tracker::EntityTracker;
pub use window::{Window, WindowAggregator};
