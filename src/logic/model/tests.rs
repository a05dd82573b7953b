//! Runner tests with an in-memory classifier standing in for ONNX.

use super::*;
use crate::error::PipelineError;
use crate::logic::features::table::{self, FeatureTable, IdentityRow};
use crate::logic::features::{FeatureSchema, IdentityColumns};
use crate::logic::manifest::Manifest;
use ndarray::ArrayView2;
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

/// Returns `codes[i % len]` per row and keeps the last input it saw
struct StubClassifier {
    codes: Vec<i64>,
    seen: Mutex<Vec<Vec<f32>>>,
}

impl StubClassifier {
    fn new(codes: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            codes: codes.to_vec(),
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &str {
        "stub"
    }

    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Vec<i64>, InferenceError> {
        *self.seen.lock() = features.rows().into_iter().map(|r| r.to_vec()).collect();
        Ok((0..features.nrows()).map(|i| self.codes[i % self.codes.len()]).collect())
    }
}

/// Always returns a single label, whatever the row count
struct ShortClassifier;

impl Classifier for ShortClassifier {
    fn name(&self) -> &str {
        "short"
    }

    fn predict(&self, _features: ArrayView2<'_, f32>) -> Result<Vec<i64>, InferenceError> {
        Ok(vec![0])
    }
}

fn runner(classifier: Arc<dyn Classifier>, log_path: &Path) -> ClassifierRunner {
    ClassifierRunner::new(
        classifier,
        Arc::new(FeatureSchema::default()),
        Arc::new(LabelMap::default()),
        PredictionLog::open(log_path.to_path_buf()).unwrap(),
    )
}

fn full_table(row_ids: &[u64]) -> FeatureTable {
    let schema = FeatureSchema::default();
    FeatureTable {
        columns: schema.canonical_names().into_iter().map(str::to_string).collect(),
        row_ids: row_ids.to_vec(),
        values: row_ids.iter().map(|&id| vec![id as f64 + 1.0; schema.width()]).collect(),
    }
}

fn identity(rows: &[(u64, &str, &str)]) -> Vec<IdentityRow> {
    rows.iter()
        .map(|(id, src, dst)| IdentityRow {
            row_id: *id,
            source: src.to_string(),
            destination: dst.to_string(),
            timestamp: format!("2024-06-13 10:15:{:02}", id),
        })
        .collect()
}

fn write_pair(dir: &Path, stem: &str, features: &FeatureTable, ident: &[IdentityRow]) -> std::path::PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{}.csv", stem));
    table::write_features(&path, features).unwrap();
    table::write_identity(&dir.join(format!("{}_aux.csv", stem)), ident, &IdentityColumns::default())
        .unwrap();
    path
}

#[test]
fn test_label_decoded_into_record() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[2]), &dir.path().join("log.ndjson"));

    let records = runner
        .classify_table(
            Path::new("capture_1.csv"),
            &full_table(&[0]),
            &identity(&[(0, "10.0.0.1", "10.0.0.2")]),
        )
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].prediction, "DrDoS_NetBIOS");
    assert_eq!(records[0].index, 0);
    assert_eq!(records[0].source_file, "capture_1");
}

#[test]
fn test_unknown_label_is_an_error() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[0, 99]), &dir.path().join("log.ndjson"));

    let err = runner
        .classify_table(
            Path::new("capture_1.csv"),
            &full_table(&[0, 1]),
            &identity(&[(0, "a", "b"), (1, "a", "b")]),
        )
        .unwrap_err();

    match err {
        PipelineError::UnknownLabel { code, .. } => assert_eq!(code, 99),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_rows_joined_by_row_id_not_position() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[0]), &dir.path().join("log.ndjson"));

    // rows 1 and 3 were filtered out by the normalizer
    let ident = identity(&[(0, "a", "b"), (1, "a", "b"), (2, "a", "b"), (3, "a", "b")]);
    let records = runner
        .classify_table(Path::new("c.csv"), &full_table(&[0, 2]), &ident)
        .unwrap();

    let indexes: Vec<u64> = records.iter().map(|r| r.index).collect();
    assert_eq!(indexes, vec![0, 2]);
    assert!(records[1].timestamp.starts_with("2024-06-13T10:15:02"));
}

#[test]
fn test_record_timestamps_normalized_or_kept_raw() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[0]), &dir.path().join("log.ndjson"));

    let mut ident = identity(&[(0, "a", "b"), (1, "a", "b")]);
    ident[0].timestamp = "13/06/2024 10:15:32 AM".to_string();
    ident[1].timestamp = "yesterday".to_string();

    let records = runner
        .classify_table(Path::new("c.csv"), &full_table(&[0, 1]), &ident)
        .unwrap();
    assert!(records[0].timestamp.starts_with("2024-06-13T10:15:32"));
    assert!(chrono::DateTime::parse_from_rfc3339(&records[0].timestamp).is_ok());
    assert_eq!(records[1].timestamp, "yesterday");
}

#[test]
fn test_misaligned_pair_rejected() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[0]), &dir.path().join("log.ndjson"));
    let path = Path::new("c.csv");

    // identity shorter than features
    let err = runner
        .classify_table(path, &full_table(&[0, 1]), &identity(&[(0, "a", "b")]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Misaligned { .. }));

    // feature row without identity
    let err = runner
        .classify_table(path, &full_table(&[5]), &identity(&[(0, "a", "b")]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Misaligned { .. }));

    // duplicated identity row
    let err = runner
        .classify_table(path, &full_table(&[0]), &identity(&[(0, "a", "b"), (0, "c", "d")]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Misaligned { .. }));
}

#[test]
fn test_label_count_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let runner = runner(Arc::new(ShortClassifier), &dir.path().join("log.ndjson"));

    let err = runner
        .classify_table(
            Path::new("c.csv"),
            &full_table(&[0, 1]),
            &identity(&[(0, "a", "b"), (1, "a", "b")]),
        )
        .unwrap_err();
    assert!(matches!(err, PipelineError::Misaligned { .. }));
}

#[test]
fn test_dominant_endpoints_over_whole_identity_table() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[0]), &dir.path().join("log.ndjson"));

    // row 2 (the majority source) does not survive normalization
    let ident = identity(&[
        (0, "10.0.0.9", "10.0.0.1"),
        (1, "10.0.0.5", "10.0.0.2"),
        (2, "10.0.0.5", "10.0.0.1"),
        (3, "10.0.0.7", "10.0.0.2"),
    ]);
    let records = runner
        .classify_table(Path::new("c.csv"), &full_table(&[0, 1]), &ident)
        .unwrap();

    for record in &records {
        assert_eq!(record.source_ip, "10.0.0.5");
        // 10.0.0.1 and 10.0.0.2 tie; first seen wins
        assert_eq!(record.dest_ip, "10.0.0.1");
    }
}

#[test]
fn test_dropped_columns_fed_as_zero() {
    let dir = tempdir().unwrap();
    let stub = StubClassifier::new(&[0]);
    let runner = runner(stub.clone(), &dir.path().join("log.ndjson"));

    let table = FeatureTable {
        columns: vec!["Source Port".to_string(), "Flow Bytes/s".to_string()],
        row_ids: vec![0],
        values: vec![vec![80.0, 42.0]],
    };
    runner
        .classify_table(Path::new("c.csv"), &table, &identity(&[(0, "a", "b")]))
        .unwrap();

    let schema = FeatureSchema::default();
    let seen = stub.seen.lock();
    assert_eq!(seen[0].len(), schema.width());
    assert_eq!(seen[0][schema.position("Source Port").unwrap()], 80.0);
    assert_eq!(seen[0][schema.position("Flow Bytes/s").unwrap()], 42.0);
    assert_eq!(seen[0].iter().filter(|v| **v == 0.0).count(), schema.width() - 2);
}

#[test]
fn test_unknown_or_reordered_column_rejected() {
    let dir = tempdir().unwrap();
    let runner = runner(StubClassifier::new(&[0]), &dir.path().join("log.ndjson"));
    let ident = identity(&[(0, "a", "b")]);

    let unknown = FeatureTable {
        columns: vec!["Source Port".to_string(), "Bwd IAT Mean".to_string()],
        row_ids: vec![0],
        values: vec![vec![1.0, 2.0]],
    };
    match runner.classify_table(Path::new("c.csv"), &unknown, &ident).unwrap_err() {
        PipelineError::UnexpectedColumn { column, .. } => assert_eq!(column, "Bwd IAT Mean"),
        other => panic!("unexpected {:?}", other),
    }

    let reordered = FeatureTable {
        columns: vec!["Flow Bytes/s".to_string(), "Source Port".to_string()],
        row_ids: vec![0],
        values: vec![vec![1.0, 2.0]],
    };
    let err = runner.classify_table(Path::new("c.csv"), &reordered, &ident).unwrap_err();
    assert!(matches!(err, PipelineError::UnexpectedColumn { .. }));
}

#[test]
fn test_empty_table_skips_model() {
    let dir = tempdir().unwrap();
    let runner = runner(Arc::new(ShortClassifier), &dir.path().join("log.ndjson"));

    let records = runner
        .classify_table(Path::new("c.csv"), &full_table(&[]), &[])
        .unwrap();
    assert!(records.is_empty());
}

#[test]
fn test_batch_appends_once_and_reports_missing_identity() {
    let dir = tempdir().unwrap();
    let normalized = dir.path().join("normalized");
    let log_path = dir.path().join("predictions").join("all.ndjson");
    let runner = runner(StubClassifier::new(&[0, 4]), &log_path);

    write_pair(
        &normalized,
        "capture_1",
        &full_table(&[0, 1]),
        &identity(&[(0, "a", "b"), (1, "a", "b")]),
    );
    table::write_features(&normalized.join("capture_2.csv"), &full_table(&[0])).unwrap();

    let summary = runner.run_batch(&normalized).unwrap();
    assert_eq!(summary.processed.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].0.ends_with("capture_2.csv"));

    let records = runner.log().read_all().unwrap();
    let labels: Vec<&str> = records.iter().map(|r| r.prediction.as_str()).collect();
    assert_eq!(labels, vec!["BENIGN", "Syn"]);

    // same content again: nothing appended
    let summary = runner.run_batch(&normalized).unwrap();
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(runner.log().read_all().unwrap().len(), 2);
}

#[test]
fn test_log_partial_tail_truncated_before_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.ndjson");
    let log = PredictionLog::open(path.clone()).unwrap();

    let record = PredictionRecord {
        index: 0,
        prediction: "BENIGN".to_string(),
        source_ip: "a".to_string(),
        dest_ip: "b".to_string(),
        timestamp: "t".to_string(),
        source_file: "capture_1".to_string(),
    };
    log.append(&[record.clone()]).unwrap();

    // simulate a writer killed mid-line
    let mut content = fs::read_to_string(&path).unwrap();
    content.push_str("{\"index\":1,\"predic");
    fs::write(&path, content).unwrap();

    log.append(&[PredictionRecord { index: 7, ..record }]).unwrap();

    let records = log.read_all().unwrap();
    assert_eq!(records.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 7]);
    assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
}

#[test]
fn test_log_repair_noop_on_clean_or_missing_file() {
    let dir = tempdir().unwrap();
    let log = PredictionLog::open(dir.path().join("nested").join("log.ndjson")).unwrap();
    assert_eq!(log.repair().unwrap(), 0);
    assert!(log.read_all().unwrap().is_empty());

    fs::write(log.path(), "no newline at all").unwrap();
    assert_eq!(log.repair().unwrap(), 17);
    assert_eq!(fs::metadata(log.path()).unwrap().len(), 0);
}

#[test]
fn test_single_file_then_batch_appends_once() {
    let dir = tempdir().unwrap();
    let normalized = dir.path().join("normalized");
    let runner = runner(StubClassifier::new(&[0]), &dir.path().join("predictions").join("all.ndjson"));

    let input = write_pair(
        &normalized,
        "capture_1",
        &full_table(&[0, 1]),
        &identity(&[(0, "a", "b"), (1, "a", "b")]),
    );

    assert_eq!(runner.classify_file(&input).unwrap(), 2);
    let summary = runner.run_batch(&normalized).unwrap();
    assert!(summary.processed.is_empty());
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(runner.classify_file(&input).unwrap(), 0);

    assert_eq!(runner.log().read_all().unwrap().len(), 2);
}

#[test]
fn test_unconfirmed_append_rolled_back_and_redone() {
    let dir = tempdir().unwrap();
    let normalized = dir.path().join("normalized");
    let state = dir.path().join("predictions");
    let runner = runner(StubClassifier::new(&[0]), &state.join("all.ndjson"));

    let first = write_pair(&normalized, "capture_1", &full_table(&[0]), &identity(&[(0, "a", "b")]));
    runner.classify_file(&first).unwrap();

    // a run killed after appending capture_2 but before confirming it
    let second = write_pair(
        &normalized,
        "capture_2",
        &full_table(&[0, 1]),
        &identity(&[(0, "a", "b"), (1, "a", "b")]),
    );
    let offset = runner.log().end_offset().unwrap();
    let mut manifest = Manifest::load(&state).unwrap();
    manifest
        .mark_pending(&second, "stale".to_string(), serde_json::json!({ "log_offset": offset }))
        .unwrap();
    let orphan = PredictionRecord {
        index: 0,
        prediction: "BENIGN".to_string(),
        source_ip: "a".to_string(),
        dest_ip: "b".to_string(),
        timestamp: "t".to_string(),
        source_file: "capture_2".to_string(),
    };
    runner.log().append(&[orphan.clone(), PredictionRecord { index: 1, ..orphan }]).unwrap();

    let summary = runner.run_batch(&normalized).unwrap();
    assert_eq!(summary.processed.len(), 1);
    assert_eq!(summary.skipped.len(), 1);

    let files: Vec<String> = runner
        .log()
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.source_file)
        .collect();
    assert_eq!(files, vec!["capture_1", "capture_2", "capture_2"]);
    assert!(Manifest::load(&state).unwrap().pending().is_empty());
}

#[test]
fn test_log_truncate_to_offset() {
    let dir = tempdir().unwrap();
    let log = PredictionLog::open(dir.path().join("log.ndjson")).unwrap();
    assert_eq!(log.end_offset().unwrap(), 0);
    assert_eq!(log.truncate(0).unwrap(), 0);

    fs::write(log.path(), "{}\n{}\n").unwrap();
    assert_eq!(log.end_offset().unwrap(), 6);
    assert_eq!(log.truncate(3).unwrap(), 3);
    assert_eq!(fs::read_to_string(log.path()).unwrap(), "{}\n");
}
