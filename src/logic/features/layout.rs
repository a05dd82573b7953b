//! Feature Layout - Model Input Schema
//!
//! **This controls the model input contract.**
//!
//! ## Rules:
//! 1. Column order = model training order
//! 2. Add / remove / reorder a column → bump `version`
//!
//! A schema is an immutable value handed to the normalizer and the runner,
//! so two model versions can be driven side by side with different schemas.

use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{IoContext, PipelineError, PipelineResult};

/// Stable row identifier column, first in every normalized / identity table
pub const ROW_ID_COLUMN: &str = "row_id";

/// Default layout version
pub const FEATURE_VERSION: u8 = 1;

/// CIC-DDoS2019 decision-tree layout: (converter name, training name), in model order
pub const CIC_DDOS_LAYOUT: &[(&str, &str)] = &[
    ("Src Port", "Source Port"),
    ("Fwd Pkt Len Max", "Fwd Packet Length Max"),
    ("TotLen Fwd Pkts", "Total Length of Fwd Packets"),
    ("Flow Byts/s", "Flow Bytes/s"),
    ("Init Fwd Win Byts", "Init_Win_bytes_forward"),
    ("Dst Port", "Destination Port"),
    ("Protocol", "Protocol"),
    ("Flow Duration", "Flow Duration"),
    ("Fwd Pkt Len Std", "Fwd Packet Length Std"),
    ("Flow Pkts/s", "Flow Packets/s"),
];

// ============================================================================
// TYPES
// ============================================================================

/// One model input column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    /// Name in the converter's table
    pub raw: String,
    /// Name the model was trained with
    pub canonical: String,
}

/// Per-flow metadata split off before filtering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityColumns {
    pub source: String,
    pub destination: String,
    pub timestamp: String,
}

impl Default for IdentityColumns {
    fn default() -> Self {
        Self {
            source: "Src IP".to_string(),
            destination: "Dst IP".to_string(),
            timestamp: "Timestamp".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u8,
    pub columns: Vec<FeatureColumn>,
    #[serde(default)]
    pub identity: IdentityColumns,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::from_pairs(FEATURE_VERSION, CIC_DDOS_LAYOUT)
    }
}

impl FeatureSchema {
    pub fn from_pairs(version: u8, pairs: &[(&str, &str)]) -> Self {
        Self {
            version,
            columns: pairs
                .iter()
                .map(|(raw, canonical)| FeatureColumn {
                    raw: raw.to_string(),
                    canonical: canonical.to_string(),
                })
                .collect(),
            identity: IdentityColumns::default(),
        }
    }

    /// Load a schema shipped next to a model (JSON)
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).at(path)?;
        let schema: Self = serde_json::from_str(&content).map_err(|e| PipelineError::csv(path, e))?;
        if schema.columns.is_empty() {
            return Err(PipelineError::csv(path, "schema defines no columns"));
        }
        Ok(schema)
    }

    /// Number of model inputs
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Canonical names in model order
    pub fn canonical_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.canonical.as_str()).collect()
    }

    /// Model position of a canonical column
    pub fn position(&self, canonical: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.canonical == canonical)
    }

    /// CRC32 over version + ordered canonical names
    pub fn layout_hash(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[self.version]);
        for column in &self.columns {
            hasher.update(column.canonical.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize()
    }
}
