//! Model Module - Flow Classification
//!
//! Runs the trained classifier over normalized tables and appends decoded
//! predictions to the cumulative log.
//!
//! ## Structure
//! - `inference.rs` - `Classifier` trait + ONNX Runtime implementation
//! - `labels.rs` - numeric label → class name
//! - `record.rs` - one prediction log line
//! - `writer.rs` - append-only NDJSON log
//! - `runner.rs` - join, predict, decode, batch driver

pub mod inference;
pub mod labels;
pub mod record;
pub mod writer;
pub mod runner;

#[cfg(test)]
mod tests;

// Re-export common types
pub use inference::{Classifier, InferenceError, OnnxClassifier};
pub use labels::LabelMap;
pub use record::PredictionRecord;
pub use runner::ClassifierRunner;
pub use writer::PredictionLog;
