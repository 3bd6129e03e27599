//! Error taxonomy. A failure for one entity must never take down the stream
//! for the others, so message-level errors are reported per call and the
//! pipeline keeps going.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdsError {
    /// Unparseable message or missing mandatory fields. The message is skipped
    /// and entity state is left untouched.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// A window reached the classifier before any model artifact was
    /// installed. Fatal configuration error, surfaced immediately.
    #[error("no model artifact installed; load or train a model before streaming")]
    ModelNotTrained,

    /// Invalid configuration rejected at startup, before any message.
    #[error("invalid configuration: {reason}")]
    ConfigValidation { reason: String },

    /// Training failed; `class_counts` carries the label distribution so a
    /// degenerate dataset is diagnosable.
    #[error("training failed: {reason} (class counts: {class_counts:?})")]
    Training {
        reason: String,
        class_counts: Vec<(String, usize)>,
    },

    /// Model artifact problem other than absence (unreadable file, unknown
    /// family tag, unsupported operation for the variant).
    #[error("model error: {reason}")]
    Model { reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl IdsError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        IdsError::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        IdsError::ConfigValidation {
            reason: reason.into(),
        }
    }

    pub fn model(reason: impl Into<String>) -> Self {
        IdsError::Model {
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for IdsError {
    fn from(e: rusqlite::Error) -> Self {
        IdsError::Storage(e.to_string())
    }
}
