//! Label Map - numeric model output → class name
//!
//! Closed label space. A code outside the map is a configuration fault and
//! must never be defaulted.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, PipelineError, PipelineResult};

/// CIC-DDoS2019 classes the default model was trained on
pub const CIC_DDOS_LABELS: &[(i64, &str)] = &[
    (0, "BENIGN"),
    (1, "DrDoS_LDAP"),
    (2, "DrDoS_NetBIOS"),
    (3, "DrDoS_UDP"),
    (4, "Syn"),
    (5, "UDP-lag"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap {
    labels: BTreeMap<i64, String>,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::from_pairs(CIC_DDOS_LABELS)
    }
}

impl LabelMap {
    pub fn from_pairs(pairs: &[(i64, &str)]) -> Self {
        Self {
            labels: pairs.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        }
    }

    /// Load `{"0": "BENIGN", ...}` shipped next to a model
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).at(path)?;
        let map: Self = serde_json::from_str(&content).map_err(|e| PipelineError::csv(path, e))?;
        if map.labels.is_empty() {
            return Err(PipelineError::csv(path, "label map is empty"));
        }
        Ok(map)
    }

    pub fn decode(&self, code: i64) -> Option<&str> {
        self.labels.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_labels() {
        let labels = LabelMap::default();
        assert_eq!(labels.decode(0), Some("BENIGN"));
        assert_eq!(labels.decode(2), Some("DrDoS_NetBIOS"));
        assert_eq!(labels.decode(5), Some("UDP-lag"));
        assert_eq!(labels.decode(99), None);
        assert_eq!(labels.decode(-1), None);
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        std::fs::write(&path, r#"{"0":"normal","7":"attack"}"#).unwrap();

        let labels = LabelMap::load(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.decode(7), Some("attack"));
    }
}
