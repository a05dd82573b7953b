//! Classifier Runner
//!
//! Normalized feature table + identity side table → prediction records.
//! Feature rows are joined to identity rows by `row_id`, so filtering in the
//! normalizer can never shift a prediction onto the wrong flow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;

use super::inference::Classifier;
use super::labels::LabelMap;
use super::record::{flow_time, PredictionRecord};
use super::writer::PredictionLog;
use crate::constants::{IDENTITY_SUFFIX, TABLE_EXT};
use crate::error::{BatchSummary, IoContext, PipelineError, PipelineResult};
use crate::logic::artifact;
use crate::logic::features::table::{self, FeatureTable, IdentityRow};
use crate::logic::features::FeatureSchema;
use crate::logic::manifest::Manifest;

/// Manifest detail key: log length before a pair's append
const LOG_OFFSET: &str = "log_offset";

pub struct ClassifierRunner {
    classifier: Arc<dyn Classifier>,
    schema: Arc<FeatureSchema>,
    labels: Arc<LabelMap>,
    log: PredictionLog,
}

impl ClassifierRunner {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        schema: Arc<FeatureSchema>,
        labels: Arc<LabelMap>,
        log: PredictionLog,
    ) -> Self {
        log::info!(
            "Classifier runner: model '{}', schema v{} ({} inputs, layout {:08x}), {} labels",
            classifier.name(),
            schema.version,
            schema.width(),
            schema.layout_hash(),
            labels.len()
        );
        Self {
            classifier,
            schema,
            labels,
            log,
        }
    }

    pub fn log(&self) -> &PredictionLog {
        &self.log
    }

    /// `<dir>/<stem>_aux.csv` beside a feature table
    pub fn identity_path(features: &Path) -> PathBuf {
        let stem = features.file_stem().unwrap_or_default().to_string_lossy();
        features.with_file_name(format!("{}{}.{}", stem, IDENTITY_SUFFIX, TABLE_EXT))
    }

    /// Classify one feature table against its identity rows. `path` is only
    /// used for error context and `source_file`.
    pub fn classify_table(
        &self,
        path: &Path,
        features: &FeatureTable,
        identity: &[IdentityRow],
    ) -> PipelineResult<Vec<PredictionRecord>> {
        let positions = self.model_positions(path, &features.columns)?;
        let joined = join_identity(path, features, identity)?;

        if features.is_empty() {
            log::info!("{}: no flows to classify", path.display());
            return Ok(Vec::new());
        }

        // Model input; columns dropped upstream stay 0.0
        let width = self.schema.width();
        let mut matrix = Array2::<f32>::zeros((features.len(), width));
        for (r, row) in features.values.iter().enumerate() {
            if row.len() != positions.len() {
                return Err(PipelineError::csv(
                    path,
                    format!("row {} has {} values, header has {}", r + 1, row.len(), positions.len()),
                ));
            }
            for (&pos, &value) in positions.iter().zip(row) {
                matrix[[r, pos]] = value as f32;
            }
        }

        let codes = self
            .classifier
            .predict(matrix.view())
            .map_err(|source| PipelineError::Inference {
                path: path.to_path_buf(),
                source,
            })?;
        if codes.len() != features.len() {
            return Err(PipelineError::misaligned(
                path,
                format!("model returned {} labels for {} rows", codes.len(), features.len()),
            ));
        }

        let source_ip = dominant(identity.iter().map(|r| r.source.as_str()));
        let dest_ip = dominant(identity.iter().map(|r| r.destination.as_str()));
        let source_file = path.file_stem().unwrap_or_default().to_string_lossy().to_string();

        let mut records = Vec::with_capacity(codes.len());
        let mut raw_times = 0usize;
        for ((row_id, ident), code) in features.row_ids.iter().zip(joined).zip(codes) {
            let prediction = self.labels.decode(code).ok_or_else(|| PipelineError::UnknownLabel {
                path: path.to_path_buf(),
                code,
            })?;
            let timestamp = flow_time(&ident.timestamp).unwrap_or_else(|| {
                raw_times += 1;
                ident.timestamp.clone()
            });
            records.push(PredictionRecord {
                index: *row_id,
                prediction: prediction.to_string(),
                source_ip: source_ip.clone(),
                dest_ip: dest_ip.clone(),
                timestamp,
                source_file: source_file.clone(),
            });
        }
        if raw_times > 0 {
            log::warn!(
                "{}: {} of {} timestamps not recognized, kept as written",
                path.display(),
                raw_times,
                records.len()
            );
        }
        Ok(records)
    }

    /// Manifest of handled pairs, kept beside the prediction log
    fn manifest(&self) -> PipelineResult<Manifest> {
        let state_dir = self
            .log
            .path()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut manifest = Manifest::load(state_dir)?;
        self.recover(&mut manifest)?;
        Ok(manifest)
    }

    /// Roll back appends a killed run never confirmed. The log has a single
    /// writer, so a pending entry always covers the log's tail.
    fn recover(&self, manifest: &mut Manifest) -> PipelineResult<()> {
        for (name, entry) in manifest.pending() {
            if let Some(offset) = entry.detail.get(LOG_OFFSET).and_then(|v| v.as_u64()) {
                let removed = self.log.truncate(offset)?;
                if removed > 0 {
                    log::warn!(
                        "{}: unconfirmed append rolled back ({} bytes removed from {})",
                        name,
                        removed,
                        self.log.path().display()
                    );
                }
            }
            manifest.forget(&name)?;
        }
        Ok(())
    }

    /// Classify one persisted pair and append its records. Returns the count,
    /// 0 when this exact pair was already classified.
    pub fn classify_file(&self, features_path: &Path) -> PipelineResult<usize> {
        let mut manifest = self.manifest()?;
        let identity_path = self.require_identity(features_path)?;
        let fingerprint = pair_fingerprint(features_path, &identity_path)?;

        if manifest.is_done(features_path, &fingerprint) {
            log::info!("{} already classified", features_path.display());
            return Ok(0);
        }
        self.classify_pair(&mut manifest, features_path, &identity_path, fingerprint)
    }

    fn require_identity(&self, features_path: &Path) -> PipelineResult<PathBuf> {
        let identity_path = Self::identity_path(features_path);
        if !identity_path.exists() {
            return Err(PipelineError::MissingIdentity {
                path: features_path.to_path_buf(),
                identity: identity_path,
            });
        }
        Ok(identity_path)
    }

    /// Read, classify and append one pair, bracketed by manifest entries:
    /// pending with the log offset before the append, done after it.
    fn classify_pair(
        &self,
        manifest: &mut Manifest,
        features_path: &Path,
        identity_path: &Path,
        fingerprint: String,
    ) -> PipelineResult<usize> {
        let features = table::read_features(features_path)?;
        let identity = table::read_identity(identity_path, &self.schema.identity)?;
        let records = self.classify_table(features_path, &features, &identity)?;

        let offset = self.log.end_offset()?;
        manifest.mark_pending(
            features_path,
            fingerprint.clone(),
            serde_json::json!({ LOG_OFFSET: offset }),
        )?;
        self.log.append(&records)?;
        manifest.mark_done(
            features_path,
            fingerprint,
            serde_json::json!({ "records": records.len(), LOG_OFFSET: offset }),
        )?;

        log::info!(
            "Classified {}: {} records appended to {}",
            features_path.display(),
            records.len(),
            self.log.path().display()
        );
        Ok(records.len())
    }

    /// Classify every new or changed feature table in `normalized_dir`
    pub fn run_batch(&self, normalized_dir: &Path) -> PipelineResult<BatchSummary> {
        let mut summary = BatchSummary::new("classify");
        if !normalized_dir.exists() {
            return Ok(summary);
        }
        let mut manifest = self.manifest()?;

        let tables = artifact::list_files(normalized_dir, TABLE_EXT).at(normalized_dir)?;
        for input in tables.into_iter().filter(|p| !is_identity_table(p)) {
            let identity_path = match self.require_identity(&input) {
                Ok(path) => path,
                Err(e) => {
                    summary.fail(&input, &e);
                    continue;
                }
            };

            let fingerprint = match pair_fingerprint(&input, &identity_path) {
                Ok(fp) => fp,
                Err(e) => {
                    summary.fail(&input, &e);
                    continue;
                }
            };
            if manifest.is_done(&input, &fingerprint) {
                summary.skipped.push(input);
                continue;
            }

            match self.classify_pair(&mut manifest, &input, &identity_path, fingerprint) {
                Ok(_) => summary.processed.push(input),
                Err(e) => {
                    // Undo an append that failed midway
                    if let Err(rollback) = self.recover(&mut manifest) {
                        log::error!("Rolling back {} failed: {}", input.display(), rollback);
                    }
                    summary.fail(&input, &e);
                }
            }
        }

        summary.log();
        Ok(summary)
    }

    /// Model position of every table column. The table must carry an
    /// order-preserving subset of the schema.
    fn model_positions(&self, path: &Path, columns: &[String]) -> PipelineResult<Vec<usize>> {
        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let pos = self.schema.position(column).ok_or_else(|| PipelineError::UnexpectedColumn {
                path: path.to_path_buf(),
                column: column.clone(),
                reason: "not a model input".to_string(),
            })?;
            if positions.last().map_or(false, |&prev| pos <= prev) {
                return Err(PipelineError::UnexpectedColumn {
                    path: path.to_path_buf(),
                    column: column.clone(),
                    reason: "out of model order".to_string(),
                });
            }
            positions.push(pos);
        }

        if positions.len() < self.schema.width() {
            let absent: Vec<&str> = self
                .schema
                .columns
                .iter()
                .enumerate()
                .filter(|(i, _)| !positions.contains(i))
                .map(|(_, c)| c.canonical.as_str())
                .collect();
            log::warn!("{}: absent columns fed as 0.0: {:?}", path.display(), absent);
        }
        Ok(positions)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn is_identity_table(path: &Path) -> bool {
    path.file_stem()
        .map_or(false, |s| s.to_string_lossy().ends_with(IDENTITY_SUFFIX))
}

fn pair_fingerprint(features: &Path, identity: &Path) -> PipelineResult<String> {
    Ok(format!(
        "{}:{}",
        artifact::fingerprint(features).at(features)?,
        artifact::fingerprint(identity).at(identity)?
    ))
}

/// Identity row of every feature row, in feature order
fn join_identity<'a>(
    path: &Path,
    features: &FeatureTable,
    identity: &'a [IdentityRow],
) -> PipelineResult<Vec<&'a IdentityRow>> {
    if identity.len() < features.len() {
        return Err(PipelineError::misaligned(
            path,
            format!("{} identity rows for {} feature rows", identity.len(), features.len()),
        ));
    }

    let mut by_id: HashMap<u64, &IdentityRow> = HashMap::with_capacity(identity.len());
    for row in identity {
        if by_id.insert(row.row_id, row).is_some() {
            return Err(PipelineError::misaligned(
                path,
                format!("row_id {} appears twice in identity table", row.row_id),
            ));
        }
    }

    features
        .row_ids
        .iter()
        .map(|id| {
            by_id
                .get(id)
                .copied()
                .ok_or_else(|| PipelineError::misaligned(path, format!("no identity for row_id {}", id)))
        })
        .collect()
}

/// Most frequent value; ties go to the value seen first
fn dominant<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (order, value) in values.enumerate() {
        counts.entry(value).or_insert((0, order)).0 += 1;
    }

    counts
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
        .map(|(value, _)| value.to_string())
        .unwrap_or_default()
}
