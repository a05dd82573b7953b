//! Feature Normalizer
//!
//! Raw flow table → model-ordered feature table + identity side table.
//!
//! Steps, in order:
//! 1. identity columns copied for every raw row (before any filtering)
//! 2. rename + select schema columns in model order
//! 3. ±inf / blank / unparsable → missing, filled with the column mean of
//!    the finite values of this table
//! 4. columns with no finite value at all are dropped
//! 5. exact duplicate rows dropped (first kept), then rows still non-finite
//! 6. columns that are zero in every remaining row dropped
//!
//! Rows keep their raw position as `row_id`; the runner joins on it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::layout::FeatureSchema;
use super::table::{self, FeatureTable, IdentityRow, RawTable};
use crate::constants::{IDENTITY_SUFFIX, TABLE_EXT};
use crate::error::{BatchSummary, IoContext, PipelineError, PipelineResult};
use crate::logic::artifact;
use crate::logic::manifest::Manifest;

// ============================================================================
// OUTPUT
// ============================================================================

/// What normalization did to one table
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NormalizeReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates: usize,
    pub incomplete: usize,
    pub filled_cells: usize,
    /// Dropped because zero in every row
    pub zero_columns: Vec<String>,
    /// Dropped because no row had a finite value
    pub empty_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub features: FeatureTable,
    pub identity: Vec<IdentityRow>,
    pub report: NormalizeReport,
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct FeatureNormalizer {
    schema: Arc<FeatureSchema>,
    output_dir: PathBuf,
}

impl FeatureNormalizer {
    pub fn new(schema: Arc<FeatureSchema>, output_dir: PathBuf) -> Self {
        Self { schema, output_dir }
    }

    /// (feature table, identity table) written for `input`
    pub fn output_paths(&self, input: &Path) -> (PathBuf, PathBuf) {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        (
            self.output_dir.join(format!("{}.{}", stem, TABLE_EXT)),
            self.output_dir
                .join(format!("{}{}.{}", stem, IDENTITY_SUFFIX, TABLE_EXT)),
        )
    }

    /// Pure transformation of one raw table. `path` is only used in errors.
    pub fn normalize_table(&self, path: &Path, raw: &RawTable) -> PipelineResult<Normalized> {
        let schema = &self.schema;
        let missing = |column: &str| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        };

        // 1. identity, one row per raw row
        let ids = &schema.identity;
        let src = raw.column(&ids.source).ok_or_else(|| missing(&ids.source))?;
        let dst = raw.column(&ids.destination).ok_or_else(|| missing(&ids.destination))?;
        let ts = raw.column(&ids.timestamp).ok_or_else(|| missing(&ids.timestamp))?;

        let identity: Vec<IdentityRow> = (0..raw.len())
            .map(|i| IdentityRow {
                row_id: i as u64,
                source: raw.cell(i, src).trim().to_string(),
                destination: raw.cell(i, dst).trim().to_string(),
                timestamp: raw.cell(i, ts).trim().to_string(),
            })
            .collect();

        // 2. schema columns in model order (raw name, or already-canonical name)
        let mut sources = Vec::with_capacity(schema.width());
        for column in &schema.columns {
            let idx = raw
                .column(&column.raw)
                .or_else(|| raw.column(&column.canonical))
                .ok_or_else(|| missing(&column.raw))?;
            sources.push(idx);
        }
        let names: Vec<String> = schema.columns.iter().map(|c| c.canonical.clone()).collect();

        let mut report = NormalizeReport {
            rows_in: raw.len(),
            ..Default::default()
        };

        if raw.is_empty() {
            return Ok(Normalized {
                features: FeatureTable {
                    columns: names,
                    ..Default::default()
                },
                identity,
                report,
            });
        }

        // 3. parse, non-finite → missing, mean fill
        let mut values: Vec<Vec<f64>> = (0..raw.len())
            .map(|i| sources.iter().map(|&c| parse_cell(raw.cell(i, c))).collect())
            .collect();

        let means = column_means(&values, names.len());
        for row in values.iter_mut() {
            for (cell, mean) in row.iter_mut().zip(&means) {
                if !cell.is_finite() {
                    if let Some(m) = mean {
                        *cell = *m;
                        report.filled_cells += 1;
                    }
                }
            }
        }

        // 4. columns with nothing to fill from
        let mut keep: Vec<usize> = Vec::with_capacity(names.len());
        for (idx, mean) in means.iter().enumerate() {
            if mean.is_some() {
                keep.push(idx);
            } else {
                report.empty_columns.push(names[idx].clone());
            }
        }

        // 5. duplicates, then leftovers that are still non-finite
        let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(values.len());
        let mut rows: Vec<(u64, Vec<f64>)> = Vec::with_capacity(values.len());
        for (row_id, row) in values.into_iter().enumerate() {
            let projected: Vec<f64> = keep.iter().map(|&c| row[c]).collect();
            if !seen.insert(row_key(&projected)) {
                report.duplicates += 1;
                continue;
            }
            if projected.iter().any(|v| !v.is_finite()) {
                report.incomplete += 1;
                continue;
            }
            rows.push((row_id as u64, projected));
        }

        // 6. all-zero columns (only meaningful with rows left)
        let mut retained: Vec<usize> = (0..keep.len()).collect();
        if !rows.is_empty() {
            retained.retain(|&pos| {
                let all_zero = rows.iter().all(|(_, r)| r[pos] == 0.0);
                if all_zero {
                    report.zero_columns.push(names[keep[pos]].clone());
                }
                !all_zero
            });
        }

        let features = FeatureTable {
            columns: retained.iter().map(|&pos| names[keep[pos]].clone()).collect(),
            row_ids: rows.iter().map(|(id, _)| *id).collect(),
            values: rows
                .iter()
                .map(|(_, r)| retained.iter().map(|&pos| r[pos]).collect())
                .collect(),
        };
        report.rows_out = features.len();

        Ok(Normalized {
            features,
            identity,
            report,
        })
    }

    /// Read, normalize and persist one raw table. Returns the feature table path.
    pub fn normalize_file(&self, input: &Path) -> PipelineResult<(PathBuf, NormalizeReport)> {
        let raw = table::read_raw(input)?;
        let normalized = self.normalize_table(input, &raw)?;
        let report = normalized.report.clone();

        if !report.empty_columns.is_empty() {
            log::warn!(
                "{}: columns without any finite value dropped: {:?}",
                input.display(),
                report.empty_columns
            );
        }
        if !report.zero_columns.is_empty() {
            log::info!(
                "{}: all-zero columns dropped: {:?}",
                input.display(),
                report.zero_columns
            );
        }

        fs::create_dir_all(&self.output_dir).at(&self.output_dir)?;
        let (features_path, identity_path) = self.output_paths(input);

        // Identity first: a feature table on disk always has its side table
        table::write_identity(&identity_path, &normalized.identity, &self.schema.identity)?;
        table::write_features(&features_path, &normalized.features)?;

        log::info!(
            "Normalized {}: {} -> {} rows ({} duplicate, {} incomplete)",
            input.display(),
            report.rows_in,
            report.rows_out,
            report.duplicates,
            report.incomplete
        );
        Ok((features_path, report))
    }

    /// Normalize every flow table in `flow_dir` that is new or changed
    pub fn run_batch(&self, flow_dir: &Path) -> PipelineResult<BatchSummary> {
        let mut summary = BatchSummary::new("normalize");
        fs::create_dir_all(&self.output_dir).at(&self.output_dir)?;
        artifact::sweep_partials(&self.output_dir).at(&self.output_dir)?;
        let mut manifest = Manifest::load(&self.output_dir)?;

        if !flow_dir.exists() {
            return Ok(summary);
        }

        for input in artifact::list_files(flow_dir, TABLE_EXT).at(flow_dir)? {
            let fingerprint = match artifact::fingerprint(&input) {
                Ok(fp) => fp,
                Err(e) => {
                    summary.fail(&input, &PipelineError::io(&input, e));
                    continue;
                }
            };

            let (features_path, identity_path) = self.output_paths(&input);
            if manifest.is_done(&input, &fingerprint)
                && features_path.exists()
                && identity_path.exists()
            {
                summary.skipped.push(input);
                continue;
            }

            match self.normalize_file(&input) {
                Ok((_, report)) => {
                    let detail = serde_json::to_value(&report).unwrap_or_default();
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

// ============================================================================
// HELPERS
// ============================================================================

/// Blank, unparsable and infinite cells are all "missing" (NaN)
fn parse_cell(cell: &str) -> f64 {
    match cell.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => f64::NAN,
    }
}

/// Mean of the finite values per column; `None` when a column has none.
/// Running mean, so huge rates cannot overflow the sum.
fn column_means(values: &[Vec<f64>], width: usize) -> Vec<Option<f64>> {
    let mut means = vec![0.0f64; width];
    let mut counts = vec![0usize; width];

    for row in values {
        for (c, &v) in row.iter().enumerate() {
            if v.is_finite() {
                counts[c] += 1;
                let n = counts[c] as f64;
                means[c] += v / n - means[c] / n;
            }
        }
    }

    means
        .into_iter()
        .zip(counts)
        .map(|(m, n)| if n > 0 && m.is_finite() { Some(m) } else { None })
        .collect()
}

/// Hashable identity of a row; -0.0 and 0.0 compare equal
fn row_key(row: &[f64]) -> Vec<u64> {
    row.iter()
        .map(|&v| if v == 0.0 { 0u64 } else { v.to_bits() })
        .collect()
}
