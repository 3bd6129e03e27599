//! Encrypted local verdict store for audit and replay.

mod encrypted;

pub use encrypted::VerdictStore;
