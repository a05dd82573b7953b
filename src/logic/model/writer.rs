//! Prediction log - append-only NDJSON
//!
//! Single writer. A file's records go out in one `write_all`; a writer killed
//! midway leaves at most one unterminated line, which is cut off before the
//! next append.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::record::PredictionRecord;
use crate::error::{IoContext, PipelineError, PipelineResult};

/// Bytes read per step while looking for the last newline
const TAIL_CHUNK: u64 = 8 * 1024;

pub struct PredictionLog {
    path: PathBuf,
}

impl PredictionLog {
    /// Parent directories are created; the file itself on first append
    pub fn open(path: PathBuf) -> PipelineResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).at(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate a trailing unterminated line. Returns the bytes removed.
    pub fn repair(&self) -> PipelineResult<u64> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };

        let len = file.metadata().at(&self.path)?.len();
        let keep = last_line_end(&mut file, len).at(&self.path)?;
        if keep == len {
            return Ok(0);
        }

        file.set_len(keep).at(&self.path)?;
        file.sync_all().at(&self.path)?;
        let removed = len - keep;
        log::warn!(
            "Prediction log {} ended in a partial line, truncated {} bytes",
            self.path.display(),
            removed
        );
        Ok(removed)
    }

    /// Length of the log once any partial tail is cut off; where the next
    /// append starts.
    pub fn end_offset(&self) -> PipelineResult<u64> {
        self.repair()?;
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(PipelineError::io(&self.path, e)),
        }
    }

    /// Drop everything from `offset` on. Returns the bytes removed.
    pub fn truncate(&self, offset: u64) -> PipelineResult<u64> {
        let file = match OpenOptions::new().write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };
        let len = file.metadata().at(&self.path)?.len();
        if len <= offset {
            return Ok(0);
        }
        file.set_len(offset).at(&self.path)?;
        file.sync_all().at(&self.path)?;
        Ok(len - offset)
    }

    /// Append one file's records in a single write
    pub fn append(&self, records: &[PredictionRecord]) -> PipelineResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.repair()?;

        let mut buf = Vec::with_capacity(records.len() * 160);
        for record in records {
            serde_json::to_writer(&mut buf, record).map_err(|e| {
                PipelineError::io(&self.path, io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            buf.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .at(&self.path)?;
        file.write_all(&buf).at(&self.path)?;
        file.flush().at(&self.path)?;
        Ok(())
    }

    /// Every record in the log (blank lines ignored)
    pub fn read_all(&self) -> PipelineResult<Vec<PredictionRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.at(&self.path)?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| PipelineError::csv(&self.path, format!("line {}: {}", idx + 1, e)))?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Offset just past the last `\n` (0 when there is none)
fn last_line_end(file: &mut File, len: u64) -> io::Result<u64> {
    let mut end = len;
    let mut buf = vec![0u8; TAIL_CHUNK as usize];

    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;

        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}
