use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Size and row counts of the backing store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub job_count: i64,
    pub terminal_job_count: i64,
    pub checkpoint_count: i64,
    pub term_count: i64,
}

/// `[maintenance]` settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Hours between runs of the background scheduler
    pub interval_hours: u64,
    /// Terminal jobs and their checkpoints older than this are purged
    pub retention_days: i64,
    /// VACUUM only runs once the database is larger than this
    pub vacuum_threshold_mb: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            retention_days: 7,
            vacuum_threshold_mb: 500.0,
        }
    }
}

/// Backend housekeeping that has no meaning at the job level
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Compact the store, returning the megabytes reclaimed
    async fn vacuum(&self) -> Result<f64>;

    async fn get_stats(&self) -> Result<MaintenanceStats>;
}
