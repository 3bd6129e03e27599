//! V2I-IDS entrypoint. Three commands: `run` streams a capture through the
//! sharded detector once, `follow` tails a growing capture as a daemon, and
//! `train` fits the centroid model from a labeled capture and reports
//! held-in evaluation metrics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use v2i_ids::{
    config::IdsConfig,
    decision::Verdict,
    features::FeatureExtractor,
    logging::StructuredLogger,
    message::Label,
    model::{load_artifact, CentroidClassifier, Classifier, TrainingSample},
    pipeline::IdsPipeline,
    runtime::PartitionedRuntime,
    sink::{HttpSink, JsonlSink, VerdictSink},
    source::{read_labeled_capture, JsonlSource, MessageSource},
    storage::VerdictStore,
    tracker::EntityTracker,
    window::WindowAggregator,
};

fn usage() -> ! {
    eprintln!(
        "usage: v2i-ids run <capture.jsonl>\n       v2i-ids follow <capture.jsonl>\n       v2i-ids train <labeled.jsonl>"
    );
    std::process::exit(2);
}

fn load_config() -> Result<IdsConfig, Box<dyn std::error::Error + Send + Sync>> {
    let path = std::env::var("V2I_IDS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    Ok(IdsConfig::load(&path)?)
}

fn open_sinks(
    config: &IdsConfig,
) -> Result<Vec<Box<dyn VerdictSink>>, Box<dyn std::error::Error + Send + Sync>> {
    let mut sinks: Vec<Box<dyn VerdictSink>> = Vec::new();
    if let Some(path) = &config.sink.jsonl_path {
        sinks.push(Box::new(JsonlSink::open(path)?));
    }
    if let Some(endpoint) = &config.sink.http_endpoint {
        match HttpSink::new(endpoint) {
            Some(s) => sinks.push(Box::new(s)),
            None => warn!(endpoint = %endpoint, "http sink unavailable"),
        }
    }
    Ok(sinks)
}

fn deliver(
    verdicts: &[Verdict],
    sinks: &mut [Box<dyn VerdictSink>],
    store: Option<&VerdictStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    for v in verdicts {
        if let Some(store) = store {
            store.insert(v)?;
        }
        for sink in sinks.iter_mut() {
            sink.emit(v)?;
        }
    }
    Ok(())
}

fn cmd_run(
    config: &IdsConfig,
    capture: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let classifier: Arc<dyn Classifier> = Arc::from(load_artifact(&config.model_path)?);
    let mut sinks = open_sinks(config)?;
    let store = if config.sink.store_verdicts {
        std::fs::create_dir_all(&config.data_dir)?;
        let secret = std::env::var("V2I_IDS_STORE_SECRET")
            .unwrap_or_else(|_| "store-secret-placeholder".to_string());
        Some(VerdictStore::open(
            &config.data_dir.join("verdicts.db"),
            secret.as_bytes(),
        )?)
    } else {
        None
    };

    let partitions = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let rt = tokio::runtime::Runtime::new()?;
    let (stats, verdicts) = rt.block_on(async {
        let runtime = PartitionedRuntime::spawn(config, classifier, partitions);
        let mut source = JsonlSource::open(capture)?;
        let mut parse_failures = 0u64;
        loop {
            match source.next_message() {
                Ok(Some(msg)) => runtime.dispatch(msg).await?,
                Ok(None) => break,
                Err(_) => parse_failures += 1, // logged by the source
            }
        }
        if parse_failures > 0 {
            warn!(parse_failures, "capture contained unparseable records");
        }
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(runtime.shutdown().await)
    })?;

    deliver(&verdicts, &mut sinks, store.as_ref())?;
    for sink in sinks.iter_mut() {
        sink.flush()?;
    }
    let processed: u64 = stats.iter().map(|s| s.processed).sum();
    let rejected: u64 = stats.iter().map(|s| s.rejected).sum();
    info!(
        processed,
        rejected,
        verdicts = verdicts.len(),
        "capture complete"
    );
    Ok(())
}

fn cmd_follow(
    config: &IdsConfig,
    capture: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let classifier: Arc<dyn Classifier> = Arc::from(load_artifact(&config.model_path)?);
    let mut sinks = open_sinks(config)?;
    let store = if config.sink.store_verdicts {
        std::fs::create_dir_all(&config.data_dir)?;
        let secret = std::env::var("V2I_IDS_STORE_SECRET")
            .unwrap_or_else(|_| "store-secret-placeholder".to_string());
        Some(VerdictStore::open(
            &config.data_dir.join("verdicts.db"),
            secret.as_bytes(),
        )?)
    } else {
        None
    };

    let mut pipeline = IdsPipeline::new(config);
    pipeline.install_model(classifier);
    let mut source = JsonlSource::open(capture)?;

    info!("follow mode (Ctrl+C to stop)");
    static STOP: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
    let _ = ctrlc::set_handler(|| {
        STOP.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    while !STOP.load(std::sync::atomic::Ordering::Relaxed) {
        match source.next_message() {
            Ok(Some(msg)) => {
                if let Ok(verdicts) = pipeline.process(&msg) {
                    deliver(&verdicts, &mut sinks, store.as_ref())?;
                }
            }
            // caught up with the writer; wait for more
            Ok(None) => std::thread::sleep(Duration::from_secs(1)),
            Err(_) => {}
        }
    }

    let verdicts = pipeline.finish();
    deliver(&verdicts, &mut sinks, store.as_ref())?;
    for sink in sinks.iter_mut() {
        sink.flush()?;
    }
    info!("detector stopping");
    Ok(())
}

/// Build labeled aggregate vectors by replaying the capture through the same
/// tracker, extractor, and aggregator the detector runs; a window's label is
/// the most frequent label among its member messages.
fn build_training_samples(config: &IdsConfig, capture: &Path) -> Result<Vec<TrainingSample>, Box<dyn std::error::Error + Send + Sync>> {
    let records = read_labeled_capture(capture)?;
    let mut tracker = EntityTracker::new(
        config.tracker.clone(),
        config.features.identity_window_seconds,
    );
    let extractor = FeatureExtractor::new(config.features.clone());
    let mut windows = WindowAggregator::new(config.window.clone());
    let mut labels: HashMap<String, Label> = HashMap::new();
    let mut stream_now_ms = 0i64;

    let mut samples = Vec::new();
    let label_window = |w: &v2i_ids::window::Window, labels: &HashMap<String, Label>| {
        let mut counts: HashMap<Label, usize> = HashMap::new();
        for fv in &w.vectors {
            if let Some(l) = labels.get(&fv.msg_id) {
                *counts.entry(*l).or_insert(0) += 1;
            }
        }
        let label = Label::ALL
            .into_iter()
            .max_by_key(|l| counts.get(l).copied().unwrap_or(0))?;
        Some(TrainingSample {
            features: w.aggregate().to_vec(),
            label,
        })
    };

    let mut skipped = 0u64;
    for record in records {
        if record.message.validate().is_err() {
            skipped += 1;
            continue;
        }
        if record.message.timestamp_ms > stream_now_ms {
            stream_now_ms = record.message.timestamp_ms;
        }
        let snapshot = tracker.update(&record.message, stream_now_ms);
        let fv = extractor.extract(&record.message, &snapshot);
        labels.insert(fv.msg_id.clone(), record.label);
        if let Some(w) = windows.push(fv) {
            samples.extend(label_window(&w, &labels));
        }
    }
    for w in windows.flush_all() {
        samples.extend(label_window(&w, &labels));
    }
    if skipped > 0 {
        warn!(skipped, "malformed records excluded from training");
    }
    Ok(samples)
}

fn cmd_train(
    config: &IdsConfig,
    capture: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let samples = build_training_samples(config, capture)?;
    info!(samples = samples.len(), "training set built");

    let mut model = CentroidClassifier::new(v2i_ids::features::NUM_FEATURES);
    let report = model.fit(&samples)?;
    for (label, count) in &report.class_counts {
        info!(label = %label, count, "class distribution");
    }

    let eval = model.evaluate(&samples);
    StructuredLogger::emit_json(&eval, &mut std::io::stdout());

    if let Some(parent) = config.model_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    model.save(&config.model_path)?;
    info!(path = ?config.model_path, accuracy = eval.accuracy, "model saved");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();
    let (command, capture) = match (args.get(1), args.get(2)) {
        (Some(c), Some(p)) => (c.as_str(), PathBuf::from(p)),
        _ => usage(),
    };

    let config = load_config()?;
    StructuredLogger::init(config.log.json, &config.log.level);
    info!(data_dir = ?config.data_dir, "V2I-IDS starting");

    match command {
        "run" => cmd_run(&config, &capture),
        "follow" => cmd_follow(&config, &capture),
        "train" => cmd_train(&config, &capture),
        _ => usage(),
    }
}
