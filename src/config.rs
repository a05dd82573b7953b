//! Configuration module
//!
//! Loaded from `FLOWSHIELD_*` environment variables (a `.env` file is read
//! first by `main`). Missing variables fall back to `constants.rs`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

// ============================================================================
// ENV HELPERS
// ============================================================================

fn var(name: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match var(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Ignoring invalid {}{}={:?}", ENV_PREFIX, name, raw);
                default
            }
        },
        None => default,
    }
}

fn flag(name: &str, default: bool) -> bool {
    var(name)
        .map(|s| s.to_lowercase() != "false" && s != "0")
        .unwrap_or(default)
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Capture rotator settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture tool executable
    pub tool: PathBuf,
    /// Network interface to capture on
    pub interface: String,
    /// Where capture files are written
    pub output_dir: PathBuf,
    /// Size cap per ring file (kB)
    pub filesize_kb: u64,
    /// Ring files per invocation
    pub ring_files: u32,
    /// Duration cap, also the rotation interval
    pub duration: Duration,
    /// Total capture files retained on disk
    pub max_files: usize,
}

impl CaptureConfig {
    /// Age after which a capture with no newer sibling counts as sealed
    pub fn seal_after(&self) -> Duration {
        self.duration + Duration::from_secs(CAPTURE_SEAL_GRACE_SECS)
    }
}

/// Flow converter settings
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Program to run
    pub program: String,
    /// Leading arguments placed before `<input> <output_dir>`
    pub args: Vec<String>,
    /// Working directory for the converter (CICFlowMeter wants its bin dir)
    pub workdir: Option<PathBuf>,
}

impl ConverterConfig {
    /// Parse a whitespace separated command line, e.g. `bash /opt/cfm/bin/cfm`
    pub fn from_command_line(line: &str) -> Self {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| DEFAULT_CONVERTER.to_string());
        Self {
            program,
            args: parts.collect(),
            workdir: None,
        }
    }
}

/// Analytics backend settings
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Elasticsearch base URL
    pub es_url: String,
    /// Kibana base URL
    pub kibana_url: String,
    pub username: String,
    pub password: String,
    /// Index name prefix, a timestamp is appended per run
    pub index_prefix: String,
    /// Time field of the provisioned view
    pub time_field: String,
    /// TLS certificate validation (off by default, the backend usually runs self-signed)
    pub verify_tls: bool,
    pub timeout: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            es_url: DEFAULT_ES_URL.to_string(),
            kibana_url: DEFAULT_KIBANA_URL.to_string(),
            username: DEFAULT_ES_USERNAME.to_string(),
            password: String::new(),
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
            time_field: DEFAULT_TIME_FIELD.to_string(),
            verify_tls: false,
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of all pipeline data
    pub data_dir: PathBuf,
    /// Raw flow tables produced by the converter
    pub flow_dir: PathBuf,
    /// Normalized feature + identity tables
    pub normalized_dir: PathBuf,
    /// Cumulative NDJSON prediction log
    pub prediction_log: PathBuf,
    /// ONNX model
    pub model_path: PathBuf,
    pub capture: CaptureConfig,
    pub converter: ConverterConfig,
    pub export: ExportConfig,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let data_dir = var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DATA_DIR_NAME)
        });

        let dir = |name: &str, default: &str| {
            var(name)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let capture = CaptureConfig {
            tool: var("CAPTURE_TOOL")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_TOOL)),
            interface: var("CAPTURE_INTERFACE")
                .unwrap_or_else(|| DEFAULT_CAPTURE_INTERFACE.to_string()),
            output_dir: dir("CAPTURE_DIR", "captures"),
            filesize_kb: parsed("CAPTURE_FILESIZE_KB", DEFAULT_CAPTURE_FILESIZE_KB),
            ring_files: parsed("CAPTURE_RING_FILES", DEFAULT_CAPTURE_RING_FILES),
            duration: Duration::from_secs(parsed(
                "CAPTURE_DURATION_SECS",
                DEFAULT_CAPTURE_DURATION_SECS,
            )),
            max_files: parsed("CAPTURE_MAX_FILES", DEFAULT_CAPTURE_MAX_FILES),
        };

        let mut converter = ConverterConfig::from_command_line(
            &var("CONVERTER").unwrap_or_else(|| DEFAULT_CONVERTER.to_string()),
        );
        converter.workdir = var("CONVERTER_WORKDIR").map(PathBuf::from);

        let export = ExportConfig {
            es_url: var("ES_URL").unwrap_or_else(|| DEFAULT_ES_URL.to_string()),
            kibana_url: var("KIBANA_URL").unwrap_or_else(|| DEFAULT_KIBANA_URL.to_string()),
            username: var("ES_USERNAME").unwrap_or_else(|| DEFAULT_ES_USERNAME.to_string()),
            password: var("ES_PASSWORD").unwrap_or_default(),
            index_prefix: var("INDEX_PREFIX").unwrap_or_else(|| DEFAULT_INDEX_PREFIX.to_string()),
            time_field: var("TIME_FIELD").unwrap_or_else(|| DEFAULT_TIME_FIELD.to_string()),
            verify_tls: flag("VERIFY_TLS", false),
            timeout: Duration::from_secs(parsed("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)),
        };

        Self {
            flow_dir: dir("FLOW_DIR", "flows"),
            normalized_dir: dir("NORMALIZED_DIR", "normalized"),
            prediction_log: var("PREDICTION_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("predictions").join("all_predictions.ndjson")),
            model_path: dir("MODEL_PATH", "models/classifier.onnx"),
            capture,
            converter,
            export,
            data_dir,
        }
    }

    /// Point every directory under a new data root (CLI `--data-dir`)
    pub fn rebase(mut self, data_dir: PathBuf) -> Self {
        self.capture.output_dir = data_dir.join("captures");
        self.flow_dir = data_dir.join("flows");
        self.normalized_dir = data_dir.join("normalized");
        self.prediction_log = data_dir.join("predictions").join("all_predictions.ndjson");
        self.model_path = data_dir.join("models").join("classifier.onnx");
        self.data_dir = data_dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converter_command_line() {
        let cfg = ConverterConfig::from_command_line("bash /opt/cfm/bin/cfm");
        assert_eq!(cfg.program, "bash");
        assert_eq!(cfg.args, vec!["/opt/cfm/bin/cfm".to_string()]);

        let cfg = ConverterConfig::from_command_line("   ");
        assert_eq!(cfg.program, DEFAULT_CONVERTER);
        assert!(cfg.args.is_empty());
    }

    #[test]
    fn test_rebase_moves_all_dirs() {
        let cfg = PipelineConfig::from_env().rebase(PathBuf::from("/tmp/fs"));
        assert_eq!(cfg.capture.output_dir, PathBuf::from("/tmp/fs/captures"));
        assert_eq!(cfg.flow_dir, PathBuf::from("/tmp/fs/flows"));
        assert_eq!(cfg.normalized_dir, PathBuf::from("/tmp/fs/normalized"));
        assert!(cfg.prediction_log.starts_with("/tmp/fs/predictions"));
    }
}
