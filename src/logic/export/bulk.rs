//! Bulk payload
//!
//! The prediction log is already one JSON document per line; bulk ingest
//! wants an action line before each document.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, TimeZone};

use super::ExportError;

/// Action line preceding every document
pub const BULK_ACTION: &str = r#"{"index":{}}"#;

/// Non-empty lines of the log, each checked to be JSON.
/// A missing log reads as empty.
pub fn read_documents(path: &Path) -> Result<Vec<String>, ExportError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ExportError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut documents = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = serde_json::from_str::<serde_json::Value>(line) {
            return Err(ExportError::CorruptLog {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: e.to_string(),
            });
        }
        documents.push(line.to_string());
    }
    Ok(documents)
}

/// `{"index":{}}\n<doc>\n` per document
pub fn build_payload(documents: &[String]) -> String {
    let size = documents.iter().map(|d| d.len() + BULK_ACTION.len() + 2).sum();
    let mut payload = String::with_capacity(size);
    for doc in documents {
        payload.push_str(BULK_ACTION);
        payload.push('\n');
        payload.push_str(doc);
        payload.push('\n');
    }
    payload
}

/// `<prefix>_<YYYYmmdd_HHMMSS>`
pub fn index_name<Tz: TimeZone>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}", prefix, at.format("%Y%m%d_%H%M%S"))
}
