//! Features Module - Flow Feature Normalization
//!
//! Turns converter output into the exact input the model was trained on.
//!
//! ## Structure
//! - `layout.rs` - model input schema (names, order, layout hash)
//! - `table.rs` - CSV I/O for raw, feature and identity tables
//! - `normalizer.rs` - the cleaning pipeline + batch driver

pub mod layout;
pub mod table;
pub mod normalizer;


// Re-export common types
pub use layout::{FeatureColumn, FeatureSchema, IdentityColumns, ROW_ID_COLUMN};
pub use normalizer::{FeatureNormalizer, NormalizeReport, Normalized};
pub use table::{FeatureTable, IdentityRow, RawTable};
