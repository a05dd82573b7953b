//! Logic Module - Pipeline Stages
//!
//! ## Layout
//! - `capture/` - capture rotation (stage 1)
//! - `convert/` - flow converter adapter (stage 2)
//! - `features/` - feature normalization (stage 3)
//! - `model/` - classification + prediction log (stage 4)
//! - `export/` - search backend export (stage 5)
//! - `pipeline.rs` - pass driver and watch mode (stages 2→4)

// Shared plumbing
pub mod artifact;
pub mod manifest;

// Stages
pub mod capture;
pub mod convert;
pub mod features;
pub mod model;
pub mod export;

pub mod pipeline;
