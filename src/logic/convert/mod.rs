//! Flow Converter Adapter
//!
//! Runs the external flow-feature extractor (CICFlowMeter-compatible) as
//! `<program> [args..] <capture> <output_dir>` and flattens whatever layout
//! it produces into `<flow_dir>/<capture_stem>.csv`.
//!
//! The converter writes into a private staging directory, so a failed or
//! interrupted run never leaves a half-written table under the final name.


use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::ConverterConfig;
use crate::constants::{CICFLOWMETER_SUFFIX, STAGING_DIR, TABLE_EXT};
use crate::error::{BatchSummary, IoContext, PipelineError, PipelineResult};
use crate::logic::artifact;
use crate::logic::capture::sealed_captures;
use crate::logic::manifest::Manifest;

/// Stderr lines kept in a failure report
const STDERR_TAIL_LINES: usize = 5;

pub struct FlowConverter {
    config: ConverterConfig,
    output_dir: PathBuf,
}

impl FlowConverter {
    pub fn new(config: ConverterConfig, output_dir: PathBuf) -> Self {
        Self { config, output_dir }
    }

    /// Final location of the table converted from `input`
    pub fn table_path(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        self.output_dir.join(format!("{}.{}", stem, TABLE_EXT))
    }

    fn staging_dir(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default();
        self.output_dir.join(STAGING_DIR).join(stem)
    }

    /// Convert one capture file. Overwrites a previous table for the same input.
    pub fn convert(&self, input: &Path) -> PipelineResult<PathBuf> {
        let input = fs::canonicalize(input).at(input)?;
        let staging = self.staging_dir(&input);

        if staging.exists() {
            fs::remove_dir_all(&staging).at(&staging)?;
        }
        fs::create_dir_all(&staging).at(&staging)?;
        // The converter may run from another working directory
        let staging = fs::canonicalize(&staging).at(&staging)?;

        let result = self.convert_into(&input, &staging);

        if let Err(e) = fs::remove_dir_all(&staging) {
            log::warn!("Failed to remove staging dir {}: {}", staging.display(), e);
        }
        // Drop the shared staging root once nothing else is in flight
        if let Some(root) = staging.parent() {
            let _ = fs::remove_dir(root);
        }

        result
    }

    fn convert_into(&self, input: &Path, staging: &Path) -> PipelineResult<PathBuf> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(input)
            .arg(staging)
            .stdin(Stdio::null());
        if let Some(dir) = &self.config.workdir {
            cmd.current_dir(dir);
        }

        log::debug!("Running converter {:?}", cmd);
        let output = cmd.output().map_err(|e| PipelineError::Spawn {
            program: self.config.program.clone(),
            source: e,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let mut status = output.status.to_string();
            if !tail.is_empty() {
                status.push_str(": ");
                status.push_str(&tail.into_iter().rev().collect::<Vec<_>>().join(" | "));
            }
            return Err(PipelineError::ConverterFailed {
                path: input.to_path_buf(),
                status,
            });
        }

        let produced = locate_table(staging, input).ok_or_else(|| PipelineError::TableNotFound {
            path: input.to_path_buf(),
        })?;

        fs::create_dir_all(&self.output_dir).at(&self.output_dir)?;
        let dest = self.table_path(input);
        if dest.exists() {
            fs::remove_file(&dest).at(&dest)?;
        }
        fs::rename(&produced, &dest).at(&produced)?;

        log::info!("Converted {} -> {}", input.display(), dest.display());
        Ok(dest)
    }

    /// Convert every sealed capture in `capture_dir` not yet handled
    pub fn run_batch(&self, capture_dir: &Path, seal_after: Duration) -> PipelineResult<BatchSummary> {
        let mut summary = BatchSummary::new("convert");
        fs::create_dir_all(&self.output_dir).at(&self.output_dir)?;
        let mut manifest = Manifest::load(&self.output_dir)?;
        // Captures evicted by the rotator never come back
        manifest.prune_missing(capture_dir)?;

        let captures = sealed_captures(capture_dir, seal_after).at(capture_dir)?;
        for capture in captures {
            let input = capture.path;

            let fingerprint = match artifact::fingerprint(&input) {
                Ok(fp) => fp,
                Err(e) => {
                    // Evicted between listing and reading
                    summary.fail(&input, &PipelineError::io(&input, e));
                    continue;
                }
            };

            if manifest.is_done(&input, &fingerprint) && self.table_path(&input).exists() {
                summary.skipped.push(input);
                continue;
            }

            match self.convert(&input) {
                Ok(table) => {
                    let detail = serde_json::json!({
                        "table": table.file_name().map(|n| n.to_string_lossy().to_string()),
                    });
                    manifest.mark_done(&input, fingerprint, detail)?;
                    summary.processed.push(input);
                }
                Err(e) => summary.fail(&input, &e),
            }
        }

        summary.log();
        Ok(summary)
    }
}

/// Find the converter's table in either supported layout:
/// flat (`<dir>/<name>`) or nested (`<dir>/<stem>/<name>`), where `<name>` is
/// `<stem>.csv` or CICFlowMeter's `<file_name>_Flow.csv`.
pub fn locate_table(dir: &Path, input: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?.to_string_lossy().to_string();
    let file_name = input.file_name()?.to_string_lossy().to_string();

    let names = [
        format!("{}.{}", stem, TABLE_EXT),
        format!("{}{}.{}", file_name, CICFLOWMETER_SUFFIX, TABLE_EXT),
    ];

    let nested = dir.join(&stem);
    names
        .iter()
        .flat_map(|name| [dir.join(name), nested.join(name)])
        .find(|candidate| candidate.is_file())
}
