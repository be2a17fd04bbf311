// In-memory Maintenance: stats only, there is nothing to vacuum

use crate::{MemoryCheckpointStore, MemoryJobStore};
use async_trait::async_trait;
use jobflow_core::error::Result;
use jobflow_core::port::{Maintenance, MaintenanceStats};
use std::sync::Arc;

pub struct MemoryMaintenance {
    jobs: Arc<MemoryJobStore>,
    imports: Arc<MemoryCheckpointStore>,
}

impl MemoryMaintenance {
    pub fn new(jobs: Arc<MemoryJobStore>, imports: Arc<MemoryCheckpointStore>) -> Self {
        Self { jobs, imports }
    }
}

#[async_trait]
impl Maintenance for MemoryMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        Ok(MaintenanceStats {
            db_size_mb: 0.0,
            db_size_bytes: 0,
            job_count: self.jobs.len()? as i64,
            terminal_job_count: self.jobs.terminal_count()? as i64,
            checkpoint_count: self.imports.checkpoint_count()? as i64,
            term_count: self.imports.term_count()? as i64,
        })
    }
}
