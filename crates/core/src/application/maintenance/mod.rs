//! Retention: purges terminal jobs and their checkpoints past the retention
//! window, then compacts the store when it has grown past the threshold.

use crate::domain::{JobState, JobType, PurgeFilter};
use crate::error::Result;
use crate::port::{CheckpointStore, JobStore, Maintenance, MaintenanceConfig, MaintenanceStats, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What one maintenance run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub purged_jobs: u64,
    pub purged_checkpoints: u64,
    pub reclaimed_mb: f64,
    pub stats: MaintenanceStats,
}

pub struct MaintenanceScheduler {
    store: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    maintenance: Arc<dyn Maintenance>,
    time_provider: Arc<dyn TimeProvider>,
    job_types: Vec<JobType>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        maintenance: Arc<dyn Maintenance>,
        time_provider: Arc<dyn TimeProvider>,
        job_types: Vec<JobType>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            checkpoints,
            maintenance,
            time_provider,
            job_types,
            config,
        }
    }

    /// Runs forever, once immediately and then every `interval_hours`
    pub async fn run(self) {
        let period = Duration::from_secs(self.config.interval_hours.max(1) * 3600);
        info!(?period, retention_days = self.config.retention_days, "Maintenance scheduled");

        let mut ticks = interval(period);
        loop {
            ticks.tick().await;
            if let Err(e) = self.run_now().await {
                error!(error = %e, "Scheduled maintenance failed");
            }
        }
    }

    pub async fn run_now(&self) -> Result<MaintenanceReport> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.config.retention_days * DAY_MS;
        let before = self.maintenance.get_stats().await?;

        let mut purged_jobs = 0u64;
        let mut purged_checkpoints = 0u64;
        for job_type in &self.job_types {
            let filter = PurgeFilter::new(job_type.clone(), cutoff, JobState::TERMINAL.to_vec())?;
            let ids = self.store.purge(&filter).await?;
            purged_checkpoints += self.checkpoints.delete(&ids).await?;
            purged_jobs += ids.len() as u64;
        }
        purged_checkpoints += self.checkpoints.purge_terminal(cutoff).await?;

        let reclaimed_mb = if before.db_size_mb > self.config.vacuum_threshold_mb {
            self.maintenance.vacuum().await?
        } else {
            0.0
        };

        let stats = self.maintenance.get_stats().await?;
        info!(
            purged_jobs,
            purged_checkpoints,
            reclaimed_mb,
            db_size_mb = stats.db_size_mb,
            remaining_jobs = stats.job_count,
            "Maintenance run finished"
        );

        Ok(MaintenanceReport {
            purged_jobs,
            purged_checkpoints,
            reclaimed_mb,
            stats,
        })
    }
}
