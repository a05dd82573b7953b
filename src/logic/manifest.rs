//! Processed-input Manifest
//!
//! Each stage keeps `.manifest.json` in its output directory listing the
//! inputs it has fully handled, keyed by file name and pinned to a content
//! fingerprint. An input is redone when it is absent from the manifest or
//! its contents changed.
//!
//! A stage whose output cannot be overwritten (the prediction log) marks an
//! input pending before writing, so a run killed midway can be rolled back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact;
use crate::constants::MANIFEST_FILE;
use crate::error::{IoContext, PipelineError, PipelineResult};

/// One completed input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub fingerprint: String,
    pub completed_at: DateTime<Utc>,
    /// Stage-specific summary (row counts, dropped columns, ...)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
    /// Output write started but not confirmed
    #[serde(default, skip_serializing_if = "is_false")]
    pub pending: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    entries: BTreeMap<String, ManifestEntry>,
}

/// Per-stage record of handled inputs
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Load the manifest of `dir`. A missing file is an empty manifest; an
    /// unreadable one is discarded with a warning (everything gets redone).
    pub fn load(dir: &Path) -> PipelineResult<Self> {
        fs::create_dir_all(dir).at(dir)?;
        let path = dir.join(MANIFEST_FILE);

        let entries = if path.exists() {
            let content = fs::read_to_string(&path).at(&path)?;
            match serde_json::from_str::<ManifestFile>(&content) {
                Ok(file) => file.entries,
                Err(e) => {
                    log::warn!("Discarding unreadable manifest {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, entries })
    }

    fn key(input: &Path) -> String {
        input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// True when `input` was handled with this exact content
    pub fn is_done(&self, input: &Path, fingerprint: &str) -> bool {
        self.entries
            .get(&Self::key(input))
            .map_or(false, |e| !e.pending && e.fingerprint == fingerprint)
    }

    /// Record completion and persist immediately
    pub fn mark_done(
        &mut self,
        input: &Path,
        fingerprint: String,
        detail: serde_json::Value,
    ) -> PipelineResult<()> {
        self.insert(input, fingerprint, detail, false)
    }

    /// Record that output for `input` is about to be written. `detail` must
    /// hold whatever is needed to undo a partial write.
    pub fn mark_pending(
        &mut self,
        input: &Path,
        fingerprint: String,
        detail: serde_json::Value,
    ) -> PipelineResult<()> {
        self.insert(input, fingerprint, detail, true)
    }

    fn insert(
        &mut self,
        input: &Path,
        fingerprint: String,
        detail: serde_json::Value,
        pending: bool,
    ) -> PipelineResult<()> {
        self.entries.insert(
            Self::key(input),
            ManifestEntry {
                fingerprint,
                completed_at: Utc::now(),
                detail,
                pending,
            },
        );
        self.save()
    }

    /// Entries left pending by an interrupted run, by input file name
    pub fn pending(&self) -> Vec<(String, ManifestEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.pending)
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Forget the input stored under file name `name`
    pub fn forget(&mut self, name: &str) -> PipelineResult<()> {
        if self.entries.remove(name).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Drop entries whose input no longer exists in `input_dir`; saved once.
    /// Returns the number removed.
    pub fn prune_missing(&mut self, input_dir: &Path) -> PipelineResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|name, _| input_dir.join(name).exists());
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save()?;
            log::debug!("Manifest {}: pruned {} vanished inputs", self.path.display(), removed);
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> PipelineResult<()> {
        let file = ManifestFile {
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| PipelineError::Manifest {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        artifact::write_atomic(&self.path, &json).at(&self.path)
    }
}
