//! Structured JSON logging: one object per line for ingestion and audit.

mod format;

pub use format::StructuredLogger;
