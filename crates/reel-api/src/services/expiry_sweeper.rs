//! Background service that expires completed jobs.
//!
//! Each cycle removes completed jobs older than the retention window
//! together with their artifact. Failed, pending and rendering jobs are
//! never touched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reel_models::JobRecord;
use reel_worker::{metrics, JobStore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// How long a completed job and its artifact are kept
    pub retention: Duration,
    pub enabled: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(30 * 60),
            enabled: true,
        }
    }
}

impl SweeperConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            retention: std::env::var("RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            enabled: std::env::var("ENABLE_EXPIRY_SWEEP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enabled),
        }
    }
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Jobs removed together with their artifact
    pub removed: usize,
    /// Jobs kept because their artifact could not be deleted
    pub errors: usize,
}

/// Expiry sweeper service.
pub struct ExpirySweeper {
    store: Arc<JobStore>,
    output_dir: PathBuf,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(store: Arc<JobStore>, output_dir: impl Into<PathBuf>, config: SweeperConfig) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            config,
        }
    }

    /// Start the background sweep loop.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Expiry sweep is disabled");
            return;
        }

        info!(
            "Starting expiry sweeper (interval: {:?}, retention: {:?})",
            self.config.interval, self.config.retention
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let summary = self.sweep_once(Utc::now()).await;
            if summary.removed > 0 || summary.errors > 0 {
                info!(
                    "Expiry sweep complete: {} removed, {} errors",
                    summary.removed, summary.errors
                );
            }
        }
    }

    /// Run a single sweep as of `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepSummary {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut summary = SweepSummary::default();
        for record in self.store.expired(cutoff) {
            if let Err(e) = self.delete_artifact(&record).await {
                // Keep the record so the next cycle retries
                error!(job_id = %record.id, "Failed to expire job: {:#}", e);
                summary.errors += 1;
                continue;
            }

            self.store.remove(&record.id);
            debug!(job_id = %record.id, "Expired job");
            summary.removed += 1;
        }

        if summary.removed > 0 {
            metrics::record_jobs_expired(summary.removed as u64);
        }
        summary
    }

    async fn delete_artifact(&self, record: &JobRecord) -> anyhow::Result<()> {
        let Some(artifact) = &record.output_artifact else {
            return Ok(());
        };
        let path = self.output_dir.join(artifact);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete artifact {}", path.display())),
        }
    }
}
