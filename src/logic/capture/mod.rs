//! Capture Module - Continuous Packet Capture
//!
//! Capture files are bounded slices named `capture_<unix_ts>[...].pcap`.
//! The embedded timestamp orders them; the newest one may still be growing,
//! so downstream stages only take *sealed* files.
//!
//! ## Structure
//! - `mod.rs` - naming, listing, eviction, sealing
//! - `rotator.rs` - scheduler task owning the capture processes

pub mod rotator;


pub use rotator::{CaptureRotator, RotatorStats};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::CAPTURE_PREFIX;

/// Capture file extensions accepted downstream
pub const CAPTURE_EXTS: &[&str] = &["pcap", "pcapng"];

static CAPTURE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^capture_(\d+)").unwrap());

/// Timestamp embedded in a capture file name
fn capture_ts(name: &str) -> Option<i64> {
    CAPTURE_NAME
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ============================================================================
// CAPTURE FILE
// ============================================================================

/// One capture slice on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub path: PathBuf,
    /// Creation timestamp from the file name (unix seconds)
    pub created: i64,
}

impl CaptureFile {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if !CAPTURE_EXTS.contains(&ext) {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        Some(Self {
            path: path.to_path_buf(),
            created: capture_ts(name)?,
        })
    }

    fn sort_key(&self) -> (i64, &Path) {
        (self.created, self.path.as_path())
    }
}

/// Capture files in `dir`, oldest first
pub fn list_captures(dir: &Path) -> io::Result<Vec<CaptureFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<CaptureFile> = fs::read_dir(dir)?
        .filter_map(|r| r.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| CaptureFile::from_path(&p))
        .collect();

    files.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    Ok(files)
}

/// Output path for a capture started at `now`. Never reuses a timestamp
/// already present in `dir` or handed out before (`last`).
pub fn next_capture_path(dir: &Path, now: i64, last: Option<i64>) -> io::Result<(i64, PathBuf)> {
    let existing = list_captures(dir)?;
    let newest_on_disk = existing.last().map(|c| c.created);

    let mut ts = now;
    for taken in [last, newest_on_disk].into_iter().flatten() {
        if ts <= taken {
            ts = taken + 1;
        }
    }

    Ok((ts, dir.join(format!("{}{}.pcap", CAPTURE_PREFIX, ts))))
}

/// Delete the oldest captures until at most `max_files` remain
pub fn evict_oldest(dir: &Path, max_files: usize) -> io::Result<Vec<PathBuf>> {
    let files = list_captures(dir)?;
    if files.len() <= max_files {
        return Ok(Vec::new());
    }

    let excess = files.len() - max_files;
    let mut evicted = Vec::with_capacity(excess);
    for file in files.into_iter().take(excess) {
        match fs::remove_file(&file.path) {
            Ok(()) => {
                log::info!("Evicted capture {}", file.path.display());
                evicted.push(file.path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(evicted)
}

/// Captures that are complete: a newer capture exists, or the file has not
/// been written to for `seal_after`.
pub fn sealed_captures(dir: &Path, seal_after: Duration) -> io::Result<Vec<CaptureFile>> {
    let mut files = list_captures(dir)?;
    let newest = match files.pop() {
        Some(f) => f,
        None => return Ok(files),
    };

    let idle = fs::metadata(&newest.path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .map_or(false, |age| age >= seal_after);

    if idle {
        files.push(newest);
    }
    Ok(files)
}
