//! Export Module - Prediction Log → Search Backend
//!
//! Ships the whole prediction log into a fresh timestamped index, then
//! provisions a dashboard view over it. The log itself is never modified.
//!
//! ## Structure
//! - `bulk.rs` - log reading, bulk payload, index naming
//! - `backend.rs` - `SearchBackend` trait + HTTP implementation

pub mod bulk;
pub mod backend;


use std::path::PathBuf;

use chrono::Local;
use thiserror::Error;

pub use backend::{BackendError, HttpBackend, SearchBackend};

use crate::config::ExportConfig;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("prediction log {path}, line {line}: {reason}")]
    CorruptLog {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bulk load into {index} failed: {source}")]
    Load {
        index: String,
        #[source]
        source: BackendError,
    },

    #[error("view provisioning for {index} failed: {source}")]
    Provision {
        index: String,
        #[source]
        source: BackendError,
    },
}

/// What one export run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    /// `None` when there was nothing to send
    pub index: Option<String>,
    pub documents: usize,
    pub view_created: bool,
}

pub struct Exporter {
    backend: Box<dyn SearchBackend>,
    log_path: PathBuf,
    index_prefix: String,
    time_field: String,
}

impl Exporter {
    pub fn new(backend: Box<dyn SearchBackend>, log_path: PathBuf, config: &ExportConfig) -> Self {
        Self {
            backend,
            log_path,
            index_prefix: config.index_prefix.clone(),
            time_field: config.time_field.clone(),
        }
    }

    pub async fn export(&self) -> Result<ExportReport, ExportError> {
        let documents = bulk::read_documents(&self.log_path)?;
        if documents.is_empty() {
            log::info!("Prediction log {} is empty, nothing to export", self.log_path.display());
            return Ok(ExportReport::default());
        }

        let index = bulk::index_name(&self.index_prefix, &Local::now());
        let payload = bulk::build_payload(&documents);
        log::info!("Exporting {} documents to index {}", documents.len(), index);

        let accepted = self
            .backend
            .bulk(&index, payload)
            .await
            .map_err(|source| ExportError::Load {
                index: index.clone(),
                source,
            })?;
        log::info!("Index {} loaded ({} documents accepted)", index, accepted);

        let title = format!("{}*", index);
        self.backend
            .create_view(&title, &self.time_field)
            .await
            .map_err(|source| ExportError::Provision {
                index: index.clone(),
                source,
            })?;
        log::info!("Dashboard view '{}' created (time field '{}')", title, self.time_field);

        Ok(ExportReport {
            index: Some(index),
            documents: documents.len(),
            view_created: true,
        })
    }
}
