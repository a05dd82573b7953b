//! Capture Rotator
//!
//! Scheduler task that starts a new capture every `duration` tick without
//! waiting for the previous one to exit. Every spawned process is owned by
//! the rotator: finished ones are reaped (and their exit recorded) on the
//! next tick, overlap is reported, and shutdown waits for or kills them.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use super::{evict_oldest, next_capture_path};
use crate::config::CaptureConfig;
use crate::constants::CAPTURE_SHUTDOWN_GRACE_SECS;

// ============================================================================
// STATE
// ============================================================================

/// A capture process the rotator is responsible for
struct ActiveCapture {
    child: Child,
    output: PathBuf,
    started_at: DateTime<Utc>,
}

/// Counters over the rotator lifetime
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RotatorStats {
    pub ticks: u64,
    pub started: u64,
    pub failed_starts: u64,
    pub completed: u64,
    pub failed_exits: u64,
    pub overlaps: u64,
    pub evicted: u64,
    pub killed: u64,
}

pub struct CaptureRotator {
    config: CaptureConfig,
    active: Vec<ActiveCapture>,
    last_ts: Option<i64>,
    shutdown_grace: Duration,
    stats: RotatorStats,
}

impl CaptureRotator {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            active: Vec::new(),
            last_ts: None,
            shutdown_grace: Duration::from_secs(CAPTURE_SHUTDOWN_GRACE_SECS),
            stats: RotatorStats::default(),
        }
    }

    /// Override how long shutdown waits for running captures
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn stats(&self) -> &RotatorStats {
        &self.stats
    }

    /// Number of capture processes still alive (as of the last reap)
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Capture tool invocation for one rotation
    fn command(&self, output: &Path) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.tool);
        cmd.arg("-i")
            .arg(&cfg.interface)
            .arg("-b")
            .arg(format!("filesize:{}", cfg.filesize_kb))
            .arg("-b")
            .arg(format!("files:{}", cfg.ring_files))
            .arg("-a")
            .arg(format!("duration:{}", cfg.duration.as_secs().max(1)))
            .arg("-w")
            .arg(output)
            .arg("-F")
            .arg("pcap")
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        cmd
    }

    /// Collect exit status of finished captures
    fn reap(&mut self) {
        let mut still_running = Vec::with_capacity(self.active.len());

        for mut capture in self.active.drain(..) {
            match capture.child.try_wait() {
                Ok(Some(status)) => {
                    record_exit(&mut self.stats, &capture, status);
                }
                Ok(None) => still_running.push(capture),
                Err(e) => {
                    log::warn!("Cannot poll capture {}: {}", capture.output.display(), e);
                    still_running.push(capture);
                }
            }
        }

        self.active = still_running;
    }

    /// One rotation: reap, evict, start the next capture.
    /// A failed start is logged; the next tick simply tries again.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        self.reap();

        if !self.active.is_empty() {
            self.stats.overlaps += 1;
            log::warn!(
                "{} capture(s) still running at rotation boundary",
                self.active.len()
            );
        }

        if let Err(e) = std::fs::create_dir_all(&self.config.output_dir) {
            self.stats.failed_starts += 1;
            log::error!(
                "Cannot create capture dir {}: {}",
                self.config.output_dir.display(),
                e
            );
            return;
        }

        match evict_oldest(&self.config.output_dir, self.config.max_files) {
            Ok(evicted) => self.stats.evicted += evicted.len() as u64,
            Err(e) => log::warn!("Capture eviction failed: {}", e),
        }

        let (ts, output) =
            match next_capture_path(&self.config.output_dir, Utc::now().timestamp(), self.last_ts) {
                Ok(next) => next,
                Err(e) => {
                    self.stats.failed_starts += 1;
                    log::error!("Cannot name next capture: {}", e);
                    return;
                }
            };
        self.last_ts = Some(ts);

        match self.command(&output).spawn() {
            Ok(child) => {
                self.stats.started += 1;
                log::info!(
                    "Capture started on {} -> {} (pid {:?})",
                    self.config.interface,
                    output.display(),
                    child.id()
                );
                self.active.push(ActiveCapture {
                    child,
                    output,
                    started_at: Utc::now(),
                });
            }
            Err(e) => {
                self.stats.failed_starts += 1;
                log::error!(
                    "Error starting capture tool {}: {}",
                    self.config.tool.display(),
                    e
                );
            }
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RotatorStats {
        log::info!(
            "Capture rotator started: every {}s on {}, keeping {} files in {}",
            self.config.duration.as_secs(),
            self.config.interface,
            self.config.max_files,
            self.config.output_dir.display()
        );

        let mut ticker = time::interval(self.config.duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop().await;
        self.stats
    }

    /// Give running captures the grace period, then kill what is left
    async fn stop(&mut self) {
        log::info!("Stopping capture rotator ({} running)", self.active.len());

        for mut capture in std::mem::take(&mut self.active) {
            match time::timeout(self.shutdown_grace, capture.child.wait()).await {
                Ok(Ok(status)) => record_exit(&mut self.stats, &capture, status),
                Ok(Err(e)) => log::warn!("Capture {} wait failed: {}", capture.output.display(), e),
                Err(_) => {
                    if let Err(e) = capture.child.kill().await {
                        log::warn!("Failed to kill capture {}: {}", capture.output.display(), e);
                    } else {
                        self.stats.killed += 1;
                        log::info!("Killed capture {}", capture.output.display());
                    }
                }
            }
        }
    }
}

fn record_exit(stats: &mut RotatorStats, capture: &ActiveCapture, status: ExitStatus) {
    let secs = (Utc::now() - capture.started_at).num_seconds();
    if status.success() {
        stats.completed += 1;
        log::debug!("Capture {} finished after {}s", capture.output.display(), secs);
    } else {
        stats.failed_exits += 1;
        log::warn!(
            "Capture {} exited with {} after {}s",
            capture.output.display(),
            status,
            secs
        );
    }
}
