//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every value can be overridden through a `FLOWSHIELD_*` environment variable
//! (see `config.rs`).

/// Environment variable prefix
pub const ENV_PREFIX: &str = "FLOWSHIELD_";

/// Data directory name under the platform data dir
pub const DATA_DIR_NAME: &str = "flowshield";

// ============================================================================
// CAPTURE
// ============================================================================

/// Default capture tool (tshark-compatible CLI)
pub const DEFAULT_CAPTURE_TOOL: &str = "/usr/bin/tshark";

/// Default capture interface
pub const DEFAULT_CAPTURE_INTERFACE: &str = "eth0";

/// Size cap per ring file (kB)
pub const DEFAULT_CAPTURE_FILESIZE_KB: u64 = 5120;

/// Ring file count per capture invocation
pub const DEFAULT_CAPTURE_RING_FILES: u32 = 50;

/// Duration of one capture invocation, also the rotation interval (seconds)
pub const DEFAULT_CAPTURE_DURATION_SECS: u64 = 90;

/// Captures retained on disk before oldest-first eviction
pub const DEFAULT_CAPTURE_MAX_FILES: usize = 50;

/// Grace period added to the duration cap before an idle capture is sealed
pub const CAPTURE_SEAL_GRACE_SECS: u64 = 10;

/// Grace period given to running captures on shutdown
pub const CAPTURE_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Capture file prefix
pub const CAPTURE_PREFIX: &str = "capture_";

// ============================================================================
// CONVERSION / NORMALIZATION
// ============================================================================

/// Default converter command (CICFlowMeter launcher script)
pub const DEFAULT_CONVERTER: &str = "cfm";

/// Flow table extension
pub const TABLE_EXT: &str = "csv";

/// Suffix of the identity side table
pub const IDENTITY_SUFFIX: &str = "_aux";

/// Suffix CICFlowMeter appends to its output tables
pub const CICFLOWMETER_SUFFIX: &str = "_Flow";

/// Staging directory for in-flight conversions
pub const STAGING_DIR: &str = ".staging";

/// Extension for artifacts that are still being written
pub const PARTIAL_EXT: &str = "partial";

/// Manifest file name inside each stage output dir
pub const MANIFEST_FILE: &str = ".manifest.json";

// ============================================================================
// EXPORT
// ============================================================================

/// Default Elasticsearch URL
pub const DEFAULT_ES_URL: &str = "https://127.0.0.1:9200";

/// Default Kibana URL
pub const DEFAULT_KIBANA_URL: &str = "https://127.0.0.1:443";

/// Default backend user
pub const DEFAULT_ES_USERNAME: &str = "elastic";

/// Default index name prefix
pub const DEFAULT_INDEX_PREFIX: &str = "predictions_index";

/// Default time field of the provisioned view
pub const DEFAULT_TIME_FIELD: &str = "timestamp";

/// HTTP timeout (seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Watch mode fallback poll (seconds)
pub const WATCH_POLL_SECS: u64 = 30;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "FlowShield";
