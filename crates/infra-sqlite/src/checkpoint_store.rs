// SQLite CheckpointStore Implementation
//
// A batch's term upserts and its checkpoint write share one transaction.

use crate::error::{from_db, map_sqlx_error, to_db};
use crate::term_repository::upsert_term;
use async_trait::async_trait;
use jobflow_core::domain::{Checkpoint, JobId};
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{BatchCommit, CheckpointStore, CommittedBatch};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Insert the first checkpoint, or CAS-update an existing one; returns rows affected
async fn write_checkpoint(
    conn: &mut SqliteConnection,
    cp: &Checkpoint,
    expected_batch_id: u64,
) -> Result<u64> {
    let affected = if expected_batch_id == 0 {
        sqlx::query(
            r#"
            INSERT INTO import_checkpoints (
                job_id, source_ref, header_digest, byte_offset, rows_processed,
                rows_imported, rows_unchanged, rows_skipped, rows_errored,
                last_batch_id, total_rows, last_error, terminal, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&cp.job_id)
        .bind(&cp.source_ref)
        .bind(&cp.header_digest)
        .bind(to_db(cp.byte_offset))
        .bind(to_db(cp.rows_processed))
        .bind(to_db(cp.rows_imported))
        .bind(to_db(cp.rows_unchanged))
        .bind(to_db(cp.rows_skipped))
        .bind(to_db(cp.rows_errored))
        .bind(to_db(cp.last_batch_id))
        .bind(cp.total_rows.map(to_db))
        .bind(&cp.last_error)
        .bind(cp.updated_at)
        .execute(&mut *conn)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE import_checkpoints
            SET byte_offset = ?, rows_processed = ?, rows_imported = ?, rows_unchanged = ?,
                rows_skipped = ?, rows_errored = ?, last_batch_id = ?, total_rows = ?,
                last_error = ?, updated_at = ?
            WHERE job_id = ?
              AND last_batch_id = ?
              AND terminal = 0
              AND rows_processed <= ?
              AND byte_offset <= ?
            "#,
        )
        .bind(to_db(cp.byte_offset))
        .bind(to_db(cp.rows_processed))
        .bind(to_db(cp.rows_imported))
        .bind(to_db(cp.rows_unchanged))
        .bind(to_db(cp.rows_skipped))
        .bind(to_db(cp.rows_errored))
        .bind(to_db(cp.last_batch_id))
        .bind(cp.total_rows.map(to_db))
        .bind(&cp.last_error)
        .bind(cp.updated_at)
        .bind(&cp.job_id)
        .bind(to_db(expected_batch_id))
        .bind(to_db(cp.rows_processed))
        .bind(to_db(cp.byte_offset))
        .execute(&mut *conn)
        .await
    }
    .map_err(map_sqlx_error)?;

    Ok(affected.rows_affected())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>> {
        let row: Option<CheckpointRow> =
            sqlx::query_as("SELECT * FROM import_checkpoints WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(row.map(CheckpointRow::into_checkpoint))
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<CommittedBatch> {
        let BatchCommit {
            checkpoint,
            expected_batch_id,
            terms,
        } = commit;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut written = 0u64;
        let mut unchanged = 0u64;
        for term in &terms {
            if upsert_term(&mut tx, term, &checkpoint.job_id).await? {
                written += 1;
            } else {
                unchanged += 1;
            }
        }

        let checkpoint = checkpoint.with_upserts(written, unchanged);
        if write_checkpoint(&mut tx, &checkpoint, expected_batch_id).await? == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            warn!(
                job_id = %checkpoint.job_id,
                expected_batch_id = expected_batch_id,
                "Checkpoint compare-and-swap failed; batch rolled back"
            );
            return Err(AppError::Consistency(format!(
                "checkpoint for job {} is no longer at batch {}",
                checkpoint.job_id, expected_batch_id
            )));
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(CommittedBatch {
            checkpoint,
            written,
            unchanged,
        })
    }

    async fn finish(&self, job_id: &str, last_error: Option<&str>, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_checkpoints
            SET terminal = 1, last_error = COALESCE(?, last_error), updated_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(last_error)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete(&self, job_ids: &[JobId]) -> Result<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM import_checkpoints WHERE job_id IN (");
        let mut ids = query.separated(", ");
        for id in job_ids {
            ids.push_bind(id);
        }
        ids.push_unseparated(")");

        let deleted = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(deleted.rows_affected())
    }

    async fn purge_terminal(&self, updated_before: i64) -> Result<u64> {
        let deleted =
            sqlx::query("DELETE FROM import_checkpoints WHERE terminal = 1 AND updated_at < ?")
                .bind(updated_before)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(deleted.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    job_id: String,
    source_ref: String,
    header_digest: String,
    byte_offset: i64,
    rows_processed: i64,
    rows_imported: i64,
    rows_unchanged: i64,
    rows_skipped: i64,
    rows_errored: i64,
    last_batch_id: i64,
    total_rows: Option<i64>,
    last_error: Option<String>,
    terminal: bool,
    updated_at: i64,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> Checkpoint {
        Checkpoint {
            job_id: self.job_id,
            source_ref: self.source_ref,
            header_digest: self.header_digest,
            byte_offset: from_db(self.byte_offset),
            rows_processed: from_db(self.rows_processed),
            rows_imported: from_db(self.rows_imported),
            rows_unchanged: from_db(self.rows_unchanged),
            rows_skipped: from_db(self.rows_skipped),
            rows_errored: from_db(self.rows_errored),
            last_batch_id: from_db(self.last_batch_id),
            total_rows: self.total_rows.map(from_db),
            last_error: self.last_error,
            terminal: self.terminal,
            updated_at: self.updated_at,
        }
    }
}
