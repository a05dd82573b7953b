//! Error handling
//!
//! File-level faults raised by the batch stages. Every variant carries the
//! offending path so the operator can act without re-running under a debugger.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    // Transient I/O / process faults
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("converter exited with {status} for {path}")]
    ConverterFailed { path: PathBuf, status: String },

    #[error("converter produced no flow table for {path}")]
    TableNotFound { path: PathBuf },

    // Data-shape faults
    #[error("malformed table {path}: {reason}")]
    Csv { path: PathBuf, reason: String },

    #[error("required column '{column}' missing from {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("unexpected column '{column}' in {path}: {reason}")]
    UnexpectedColumn {
        path: PathBuf,
        column: String,
        reason: String,
    },

    #[error("unknown label code {code} predicted for {path}")]
    UnknownLabel { path: PathBuf, code: i64 },

    #[error("identity/feature tables out of sync for {path}: {reason}")]
    Misaligned { path: PathBuf, reason: String },

    #[error("no identity table {identity} for {path}")]
    MissingIdentity { path: PathBuf, identity: PathBuf },

    // Model faults
    #[error("model failed on {path}: {source}")]
    Inference {
        path: PathBuf,
        #[source]
        source: crate::logic::model::InferenceError,
    },

    #[error("manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        PipelineError::Csv {
            path: path.as_ref().to_path_buf(),
            reason: err.to_string(),
        }
    }

    pub fn misaligned(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        PipelineError::Misaligned {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Upstream contract violation (as opposed to a transient fault)
    pub fn is_data_shape(&self) -> bool {
        matches!(
            self,
            PipelineError::Csv { .. }
                | PipelineError::MissingColumn { .. }
                | PipelineError::UnexpectedColumn { .. }
                | PipelineError::UnknownLabel { .. }
                | PipelineError::Misaligned { .. }
        )
    }
}

/// Extension to attach a path to `io::Result`
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> PipelineResult<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::io(path, e))
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

/// Outcome of one batch pass over a stage's input directory
#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub stage: &'static str,
    pub processed: Vec<PathBuf>,
    /// Already handled or not yet sealed
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Default::default()
        }
    }

    pub fn fail(&mut self, path: &Path, err: &PipelineError) {
        if err.is_data_shape() {
            log::error!("[{}] rejected {}: {}", self.stage, path.display(), err);
        } else {
            log::warn!("[{}] skipped {}: {}", self.stage, path.display(), err);
        }
        self.failed.push((path.to_path_buf(), err.to_string()));
    }

    pub fn log(&self) {
        log::info!(
            "[{}] pass done: {} processed, {} skipped, {} failed",
            self.stage,
            self.processed.len(),
            self.skipped.len(),
            self.failed.len()
        );
    }
}
