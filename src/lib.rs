//! FlowShield - network flow classification pipeline
//!
//! capture → convert → normalize → classify → export, each stage a
//! file-to-file batch step that can be restarted on its own.

pub mod config;
pub mod constants;
pub mod error;
pub mod logic;

pub use config::PipelineConfig;
pub use error::{BatchSummary, PipelineError, PipelineResult};
