//! Message intake. The pipeline consumes any [`MessageSource`]; the shipped
//! implementation reads newline-delimited JSON captures lazily, one record
//! per line, so multi-gigabyte traces never load into memory at once.

use crate::error::IdsError;
use crate::message::Message;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tracing::warn;

pub trait MessageSource {
    /// Next message, `Ok(None)` at end of stream. Unparseable records are an
    /// error for the caller to count and skip, not a stream terminator.
    fn next_message(&mut self) -> Result<Option<Message>, IdsError>;
}

pub struct JsonlSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl JsonlSource {
    pub fn open(path: &Path) -> Result<Self, IdsError> {
        let file = File::open(path)
            .map_err(|e| IdsError::malformed(format!("cannot open capture {path:?}: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Reopen from the first record, for multi-pass training runs.
    pub fn rewind(&mut self) -> Result<(), IdsError> {
        let reopened = Self::open(&self.path)?;
        self.lines = reopened.lines;
        self.line_no = 0;
        Ok(())
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }
}

impl MessageSource for JsonlSource {
    fn next_message(&mut self) -> Result<Option<Message>, IdsError> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str::<Message>(&line)
                .map(Some)
                .map_err(|e| {
                    warn!(line = self.line_no, error = %e, "unparseable record");
                    IdsError::malformed(format!("line {}: {e}", self.line_no))
                });
        }
    }
}

/// One labeled capture record, used by the training command.
#[derive(Debug, serde::Deserialize)]
pub struct LabeledRecord {
    #[serde(flatten)]
    pub message: Message,
    pub label: crate::message::Label,
}

/// Read an entire labeled capture eagerly; bad lines are skipped with a
/// warning so one corrupt record does not void a training set.
pub fn read_labeled_capture(path: &Path) -> Result<Vec<LabeledRecord>, IdsError> {
    let file = File::open(path)
        .map_err(|e| IdsError::malformed(format!("cannot open capture {path:?}: {e}")))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LabeledRecord>(&line) {
            Ok(r) => records.push(r),
            Err(e) => warn!(line = i + 1, error = %e, "skipping unparseable labeled record"),
        }
    }
    Ok(records)
}
