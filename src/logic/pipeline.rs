//! Pipeline Driver
//!
//! One pass = convert → normalize → classify over whatever is new on disk.
//! Passes are serialized: the prediction log has a single writer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::convert::FlowConverter;
use super::features::{FeatureNormalizer, FeatureSchema};
use super::model::{Classifier, ClassifierRunner, LabelMap, PredictionLog};
use crate::config::PipelineConfig;
use crate::constants::{MANIFEST_FILE, PARTIAL_EXT, STAGING_DIR};
use crate::error::{BatchSummary, PipelineResult};

/// Outcome of one pass
#[derive(Debug)]
pub struct PassReport {
    pub id: Uuid,
    pub convert: BatchSummary,
    pub normalize: BatchSummary,
    pub classify: BatchSummary,
}

impl PassReport {
    pub fn processed(&self) -> usize {
        self.convert.processed.len() + self.normalize.processed.len() + self.classify.processed.len()
    }

    pub fn failed(&self) -> usize {
        self.convert.failed.len() + self.normalize.failed.len() + self.classify.failed.len()
    }
}

pub struct Pipeline {
    converter: FlowConverter,
    normalizer: FeatureNormalizer,
    runner: ClassifierRunner,
    capture_dir: PathBuf,
    flow_dir: PathBuf,
    normalized_dir: PathBuf,
    seal_after: Duration,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        schema: Arc<FeatureSchema>,
        labels: Arc<LabelMap>,
        classifier: Arc<dyn Classifier>,
    ) -> PipelineResult<Self> {
        let log = PredictionLog::open(config.prediction_log.clone())?;
        Ok(Self {
            converter: FlowConverter::new(config.converter.clone(), config.flow_dir.clone()),
            normalizer: FeatureNormalizer::new(schema.clone(), config.normalized_dir.clone()),
            runner: ClassifierRunner::new(classifier, schema, labels, log),
            capture_dir: config.capture.output_dir.clone(),
            flow_dir: config.flow_dir.clone(),
            normalized_dir: config.normalized_dir.clone(),
            seal_after: config.capture.seal_after(),
        })
    }

    /// Directories whose changes can make a pass productive
    pub fn watched_dirs(&self) -> [&Path; 3] {
        [
            self.capture_dir.as_path(),
            self.flow_dir.as_path(),
            self.normalized_dir.as_path(),
        ]
    }

    /// Run stages 2→4 once. Per-file faults end up in the summaries; only
    /// faults that stop a whole stage are returned as errors.
    pub fn run_once(&self) -> PipelineResult<PassReport> {
        let id = Uuid::new_v4();
        log::debug!("Pass {} started", id);

        let convert = self.converter.run_batch(&self.capture_dir, self.seal_after)?;
        let normalize = self.normalizer.run_batch(&self.flow_dir)?;
        let classify = self.runner.run_batch(&self.normalized_dir)?;

        let report = PassReport {
            id,
            convert,
            normalize,
            classify,
        };
        if report.processed() > 0 || report.failed() > 0 {
            log::info!(
                "Pass {}: {} files processed, {} failed",
                id,
                report.processed(),
                report.failed()
            );
        }
        Ok(report)
    }
}

// ============================================================================
// WATCH MODE
// ============================================================================

/// Our own bookkeeping writes, not new work
fn is_relevant(path: &Path) -> bool {
    let bookkeeping = path.components().any(|c| c.as_os_str() == STAGING_DIR)
        || path.file_name().map_or(false, |n| n == MANIFEST_FILE)
        || path.extension().map_or(false, |e| e == PARTIAL_EXT);
    !bookkeeping
}

fn is_relevant_event(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_)) && event.paths.iter().any(|p| is_relevant(p))
}

/// Run passes on file-system changes and every `poll` until `shutdown`
/// flips to true. Returns the number of passes run.
pub async fn run_watch(
    pipeline: Arc<Pipeline>,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> PipelineResult<u64> {
    let (watcher_tx, mut watcher_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = watcher_tx.blocking_send(res);
        },
        Config::default(),
    )?;

    let mut watched = HashSet::new();
    for dir in pipeline.watched_dirs() {
        std::fs::create_dir_all(dir).map_err(|e| crate::error::PipelineError::io(dir, e))?;
        if watched.insert(dir.to_path_buf()) {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            log::info!("Watching directory: {}", dir.display());
        }
    }

    let mut passes = 0u64;
    let mut pending = true; // initial pass

    loop {
        if *shutdown.borrow() {
            break;
        }

        if pending {
            pending = false;
            let worker = pipeline.clone();
            match tokio::task::spawn_blocking(move || worker.run_once()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::error!("Pass aborted: {}", e),
                Err(e) => log::error!("Pass panicked: {}", e),
            }
            passes += 1;

            // Events raised during the pass are covered by the next one
            while let Ok(res) = watcher_rx.try_recv() {
                if matches!(res, Ok(ref event) if is_relevant_event(event)) {
                    pending = true;
                }
            }
            continue;
        }

        tokio::select! {
            Some(res) = watcher_rx.recv() => {
                match res {
                    Ok(event) => {
                        if is_relevant_event(&event) {
                            log::debug!("Change detected: {:?}", event.paths);
                            pending = true;
                        }
                    }
                    Err(e) => {
                        log::error!("File watcher error: {}", e);
                    }
                }
            }

            // Fallback poll: sealing is time-based and produces no event
            _ = tokio::time::sleep(poll) => {
                pending = true;
            }

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::info!("Watch stopped after {} passes", passes);
    Ok(passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::InferenceError;
    use ndarray::ArrayView2;
    use std::fs;
    use tempfile::tempdir;

    struct AllBenign;

    impl Classifier for AllBenign {
        fn name(&self) -> &str {
            "benign"
        }

        fn predict(&self, features: ArrayView2<'_, f32>) -> Result<Vec<i64>, InferenceError> {
            Ok(vec![0; features.nrows()])
        }
    }

    fn pipeline(root: &Path) -> Pipeline {
        let config = PipelineConfig::from_env().rebase(root.to_path_buf());
        Pipeline::new(
            &config,
            Arc::new(FeatureSchema::default()),
            Arc::new(LabelMap::default()),
            Arc::new(AllBenign),
        )
        .unwrap()
    }

    const FLOWS: &str = "Src IP,Dst IP,Timestamp,Src Port,Fwd Pkt Len Max,TotLen Fwd Pkts,Flow Byts/s,\
Init Fwd Win Byts,Dst Port,Protocol,Flow Duration,Fwd Pkt Len Std,Flow Pkts/s
10.0.0.1,10.0.0.2,t0,80,1500,3000,inf,64,443,6,100,0,10
10.0.0.1,10.0.0.2,t1,81,1500,3000,200,64,443,6,100,0,10
";

    #[test]
    fn test_pass_takes_flow_tables_to_predictions() {
        let dir = tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        fs::create_dir_all(dir.path().join("flows")).unwrap();
        fs::write(dir.path().join("flows").join("capture_100.csv"), FLOWS).unwrap();

        let report = pipeline.run_once().unwrap();
        assert_eq!(report.normalize.processed.len(), 1);
        assert_eq!(report.classify.processed.len(), 1);

        let records = pipeline.runner.log().read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.prediction == "BENIGN"));
        assert_eq!(records[1].timestamp, "t1");

        // nothing new: second pass appends nothing
        let report = pipeline.run_once().unwrap();
        assert_eq!(report.processed(), 0);
        assert_eq!(pipeline.runner.log().read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_bookkeeping_paths_ignored() {
        assert!(!is_relevant(Path::new("/d/flows/.staging/capture_1/x.csv")));
        assert!(!is_relevant(Path::new("/d/normalized/.manifest.json")));
        assert!(!is_relevant(Path::new("/d/normalized/capture_1.csv.partial")));
        assert!(is_relevant(Path::new("/d/captures/capture_1.pcap")));
    }

    #[tokio::test]
    async fn test_watch_runs_initial_pass_and_stops() {
        let dir = tempdir().unwrap();
        let pipeline = Arc::new(pipeline(dir.path()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_watch(pipeline, Duration::from_secs(3600), rx));
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();

        let passes = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(passes >= 1);
    }
}
