use crate::error::map_sqlx_error;
use async_trait::async_trait;
use jobflow_core::error::Result;
use jobflow_core::port::{Maintenance, MaintenanceStats};
use sqlx::{Row, SqlitePool};
use tracing::info;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

const STATS_SQL: &str = "SELECT \
     (SELECT COUNT(*) FROM jobs) AS jobs, \
     (SELECT COUNT(*) FROM jobs WHERE state IN ('COMPLETED', 'DEAD_LETTER', 'CANCELLED')) AS terminal, \
     (SELECT COUNT(*) FROM import_checkpoints) AS checkpoints, \
     (SELECT COUNT(*) FROM terms) AS terms";

/// VACUUM and size/row statistics for the SQLite backend
pub struct SqliteMaintenance {
    pool: SqlitePool,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn size_bytes(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT page_count * page_size AS size \
             FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.try_get("size").map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        let before = self.size_bytes().await?;
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let after = self.size_bytes().await?;

        let reclaimed_mb = (before - after).max(0) as f64 / BYTES_PER_MB;
        info!(before, after, reclaimed_mb, "Database vacuumed");
        Ok(reclaimed_mb)
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let db_size_bytes = self.size_bytes().await?;
        let row = sqlx::query(STATS_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(MaintenanceStats {
            db_size_mb: db_size_bytes as f64 / BYTES_PER_MB,
            db_size_bytes,
            job_count: row.try_get("jobs").map_err(map_sqlx_error)?,
            terminal_job_count: row.try_get("terminal").map_err(map_sqlx_error)?,
            checkpoint_count: row.try_get("checkpoints").map_err(map_sqlx_error)?,
            term_count: row.try_get("terms").map_err(map_sqlx_error)?,
        })
    }
}
