use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use flowshield::constants::{APP_NAME, APP_VERSION, WATCH_POLL_SECS};
use flowshield::logic::capture::CaptureRotator;
use flowshield::logic::convert::FlowConverter;
use flowshield::logic::export::{Exporter, HttpBackend};
use flowshield::logic::features::{FeatureNormalizer, FeatureSchema};
use flowshield::logic::model::{ClassifierRunner, LabelMap, OnnxClassifier, PredictionLog};
use flowshield::logic::pipeline::{self, Pipeline};
use flowshield::{BatchSummary, PipelineConfig};

#[derive(Parser)]
#[command(name = "flowshield")]
#[command(author, version, about = "Network flow capture, classification and export pipeline")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Extra .env file to load (a .env in the working directory is always read)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Root of all pipeline data; overrides the per-directory settings
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// ONNX model
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Feature schema JSON (default: CIC-DDoS 10-feature layout)
    #[arg(long, global = true, env = "FLOWSHIELD_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// Label map JSON (default: CIC-DDoS classes)
    #[arg(long, global = true, env = "FLOWSHIELD_LABELS")]
    pub labels: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the capture rotator until interrupted
    Capture,

    /// Convert sealed captures to flow tables
    Convert {
        /// Convert this capture only
        input: Option<PathBuf>,
    },

    /// Normalize flow tables into feature + identity tables
    Normalize {
        /// Normalize this flow table only
        input: Option<PathBuf>,
    },

    /// Classify normalized tables and append to the prediction log
    Classify {
        /// Classify this feature table only
        input: Option<PathBuf>,
    },

    /// Ship the prediction log to the search backend
    Export,

    /// One convert → normalize → classify pass
    Run {
        /// Export the log after the pass
        #[arg(long)]
        export: bool,
    },

    /// Run passes whenever new data lands, until interrupted
    Watch {
        /// Also run the capture rotator
        #[arg(long)]
        capture: bool,

        /// Fallback poll interval in seconds
        #[arg(long, default_value_t = WATCH_POLL_SECS)]
        poll: u64,
    },
}

struct Setup {
    config: PipelineConfig,
    schema: Option<PathBuf>,
    labels: Option<PathBuf>,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config = config.rebase(dir);
    }
    if let Some(model) = cli.model {
        config.model_path = model;
    }
    log::info!("{} v{} (data: {})", APP_NAME, APP_VERSION, config.data_dir.display());

    let ctx = Setup {
        config,
        schema: cli.schema,
        labels: cli.labels,
    };

    match cli.command {
        Commands::Capture => {
            let rotator = CaptureRotator::new(ctx.config.capture.clone());
            let stats = rotator.run(shutdown_channel()).await;
            log::info!("Capture stopped: {:?}", stats);
        }

        Commands::Convert { input } => {
            let converter = FlowConverter::new(ctx.config.converter.clone(), ctx.config.flow_dir.clone());
            match input {
                Some(path) => {
                    let table = converter
                        .convert(&path)
                        .with_context(|| format!("converting {}", path.display()))?;
                    println!("{}", table.display());
                }
                None => {
                    let summary = converter
                        .run_batch(&ctx.config.capture.output_dir, ctx.config.capture.seal_after())
                        .context("convert pass")?;
                    print_summary(&summary);
                }
            }
        }

        Commands::Normalize { input } => {
            let normalizer = FeatureNormalizer::new(ctx.schema()?, ctx.config.normalized_dir.clone());
            match input {
                Some(path) => {
                    let (table, report) = normalizer
                        .normalize_file(&path)
                        .with_context(|| format!("normalizing {}", path.display()))?;
                    println!("{}", table.display());
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                None => {
                    let summary = normalizer
                        .run_batch(&ctx.config.flow_dir)
                        .context("normalize pass")?;
                    print_summary(&summary);
                }
            }
        }

        Commands::Classify { input } => {
            let runner = ctx.runner()?;
            match input {
                Some(path) => {
                    let count = runner
                        .classify_file(&path)
                        .with_context(|| format!("classifying {}", path.display()))?;
                    println!("{} records appended to {}", count, runner.log().path().display());
                }
                None => {
                    let summary = runner
                        .run_batch(&ctx.config.normalized_dir)
                        .context("classify pass")?;
                    print_summary(&summary);
                }
            }
        }

        Commands::Export => export(&ctx.config).await?,

        Commands::Run { export: and_export } => {
            let pipeline = ctx.pipeline()?;
            let report = pipeline.run_once().context("pipeline pass")?;
            for summary in [&report.convert, &report.normalize, &report.classify] {
                print_summary(summary);
            }
            if and_export {
                export(&ctx.config).await?;
            }
        }

        Commands::Watch { capture, poll } => {
            let pipeline = Arc::new(ctx.pipeline()?);
            let shutdown = shutdown_channel();

            let rotator = capture.then(|| {
                let rotator = CaptureRotator::new(ctx.config.capture.clone());
                tokio::spawn(rotator.run(shutdown.clone()))
            });

            let passes = pipeline::run_watch(pipeline, Duration::from_secs(poll.max(1)), shutdown)
                .await
                .context("watch")?;
            println!("{} passes", passes);

            if let Some(handle) = rotator {
                let stats = handle.await.context("capture task")?;
                log::info!("Capture stopped: {:?}", stats);
            }
        }
    }

    Ok(())
}

impl Setup {
    fn schema(&self) -> Result<Arc<FeatureSchema>> {
        let schema = match &self.schema {
            Some(path) => FeatureSchema::load(path)
                .with_context(|| format!("loading feature schema {}", path.display()))?,
            None => FeatureSchema::default(),
        };
        Ok(Arc::new(schema))
    }

    fn labels(&self) -> Result<Arc<LabelMap>> {
        let labels = match &self.labels {
            Some(path) => LabelMap::load(path)
                .with_context(|| format!("loading label map {}", path.display()))?,
            None => LabelMap::default(),
        };
        Ok(Arc::new(labels))
    }

    fn classifier(&self) -> Result<Arc<OnnxClassifier>> {
        let model = OnnxClassifier::load(&self.config.model_path)
            .with_context(|| format!("loading model {}", self.config.model_path.display()))?;
        Ok(Arc::new(model))
    }

    fn runner(&self) -> Result<ClassifierRunner> {
        let log = PredictionLog::open(self.config.prediction_log.clone())?;
        Ok(ClassifierRunner::new(self.classifier()?, self.schema()?, self.labels()?, log))
    }

    fn pipeline(&self) -> Result<Pipeline> {
        Ok(Pipeline::new(&self.config, self.schema()?, self.labels()?, self.classifier()?)?)
    }
}

async fn export(config: &PipelineConfig) -> Result<()> {
    let backend = HttpBackend::new(&config.export).context("building HTTP client")?;
    let exporter = Exporter::new(Box::new(backend), config.prediction_log.clone(), &config.export);
    let report = exporter.export().await?;
    match report.index {
        Some(index) => println!("{} documents exported to {}", report.documents, index),
        None => println!("Prediction log is empty, nothing exported"),
    }
    Ok(())
}

/// Flips to true on Ctrl-C
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "{:<10} processed {:>4}  skipped {:>4}  failed {:>4}",
        summary.stage,
        summary.processed.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    for (path, reason) in &summary.failed {
        println!("  ✗ {}: {}", path.display(), reason);
    }
}
