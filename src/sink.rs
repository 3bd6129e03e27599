//! Verdict delivery: append-only JSONL for local pipelines plus an HTTP
//! reporter for a fusion endpoint. Delivery failures are logged and skipped;
//! detection never stalls on a slow or absent consumer.

use crate::decision::Verdict;
use crate::error::IdsError;
use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub trait VerdictSink: Send {
    fn emit(&mut self, verdict: &Verdict) -> Result<(), IdsError>;

    fn flush(&mut self) -> Result<(), IdsError> {
        Ok(())
    }
}

/// One JSON object per line, appended so interrupted runs lose nothing
/// already written.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self, IdsError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl VerdictSink for JsonlSink {
    fn emit(&mut self, verdict: &Verdict) -> Result<(), IdsError> {
        serde_json::to_writer(&mut self.writer, verdict)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), IdsError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn ts_iso(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Wire payload for the reporting endpoint.
#[derive(Serialize)]
struct VerdictPayload<'a> {
    verdict_id: &'a str,
    entity_id: &'a str,
    label: &'a str,
    confidence: f32,
    window_start: String,
    window_end: String,
    evidence: &'a [(String, f32)],
}

pub struct HttpSink {
    client: reqwest::blocking::Client,
    url: String,
    delivered: u64,
    failed: u64,
}

impl HttpSink {
    pub fn new(endpoint: &str) -> Option<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .ok()?;
        Some(Self {
            client,
            url: format!("{}/api/v1/verdicts", endpoint.trim_end_matches('/')),
            delivered: 0,
            failed: 0,
        })
    }

    fn post(&self, verdict: &Verdict) -> Result<(), String> {
        let payload = VerdictPayload {
            verdict_id: &verdict.verdict_id,
            entity_id: &verdict.entity_id,
            label: verdict.label.as_str(),
            confidence: verdict.confidence,
            window_start: ts_iso(verdict.window_start_ms),
            window_end: ts_iso(verdict.window_end_ms),
            evidence: &verdict.evidence,
        };
        let res = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().unwrap_or_default();
            return Err(format!("{status} {text}"));
        }
        Ok(())
    }
}

impl VerdictSink for HttpSink {
    fn emit(&mut self, verdict: &Verdict) -> Result<(), IdsError> {
        match self.post(verdict) {
            Ok(()) => {
                self.delivered += 1;
                Ok(())
            }
            Err(e) => {
                // best-effort delivery: log and keep the stream moving
                self.failed += 1;
                warn!(verdict_id = %verdict.verdict_id, error = %e, "verdict delivery failed");
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<(), IdsError> {
        info!(
            delivered = self.delivered,
            failed = self.failed,
            "verdict reporter summary"
        );
        Ok(())
    }
}
