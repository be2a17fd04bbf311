// SQLite JobStore Implementation

use crate::error::{map_sqlx_error, unique_violation};
use async_trait::async_trait;
use jobflow_core::domain::{AttemptRecord, Job, JobId, JobPayload, JobState, JobType, PurgeFilter};
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::JobStore;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::debug;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn existing_for_dedupe_key(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar(
            "SELECT id FROM jobs WHERE dedupe_key = ? AND state IN ('WAITING', 'ACTIVE') LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let attempt_log = serde_json::to_string(&job.attempt_log)?;
        let result = job.result.as_ref().map(|r| r.to_string());

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, priority, state, dedupe_key,
                attempts, max_attempts, created_at, updated_at,
                started_at, finished_at, visible_at, stalled_at,
                cancel_requested, last_error, attempt_log, result
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(job.priority)
        .bind(job.state.as_str())
        .bind(&job.dedupe_key)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.visible_at)
        .bind(job.stalled_at)
        .bind(job.cancel_requested)
        .bind(&job.last_error)
        .bind(attempt_log)
        .bind(result)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(err) => match (unique_violation(&err), &job.dedupe_key) {
                (Some(msg), Some(key)) if msg.contains("dedupe_key") => {
                    Err(AppError::DuplicateJob {
                        dedupe_key: key.clone(),
                        existing_job_id: self.existing_for_dedupe_key(key).await?,
                    })
                }
                (Some(_), _) => Err(AppError::Conflict(format!(
                    "job {} already exists",
                    job.id
                ))),
                (None, _) => Err(map_sqlx_error(err)),
            },
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_next(&self, job_type: &JobType, now: i64) -> Result<Option<Job>> {
        // Single statement: the subquery pick and the state flip are one atomic write
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'ACTIVE',
                attempts = attempts + 1,
                started_at = ?,
                updated_at = ?,
                stalled_at = NULL
            WHERE id = (
                SELECT id FROM jobs
                WHERE job_type = ? AND state = 'WAITING' AND visible_at <= ?
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            )
              AND state = 'WAITING'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(job_type.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = &row {
            debug!(job_id = %row.id, job_type = %job_type, "Claimed job");
        }
        row.map(JobRow::into_job).transpose()
    }

    async fn transition(&self, job: &Job, expected: JobState) -> Result<()> {
        let attempt_log = serde_json::to_string(&job.attempt_log)?;
        let result = job.result.as_ref().map(|r| r.to_string());

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempts = ?, updated_at = ?,
                started_at = ?, finished_at = ?, visible_at = ?, stalled_at = ?,
                cancel_requested = ?, last_error = ?, attempt_log = ?, result = ?
            WHERE id = ? AND state = ? AND cancel_requested <= ?
            "#,
        )
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.visible_at)
        .bind(job.stalled_at)
        .bind(job.cancel_requested)
        .bind(&job.last_error)
        .bind(attempt_log)
        .bind(result)
        .bind(&job.id)
        .bind(expected.as_str())
        .bind(job.cancel_requested)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String, bool)> =
            sqlx::query_as("SELECT state, cancel_requested FROM jobs WHERE id = ?")
                .bind(&job.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match current {
            None => Err(AppError::NotFound(format!("job {}", job.id))),
            Some((state, true)) if state == expected.as_str() => Err(AppError::Conflict(format!(
                "cancel requested for job {} after it was read",
                job.id
            ))),
            Some((state, _)) => Err(AppError::InvalidState(format!(
                "job {} is {}, expected {} (cannot move to {})",
                job.id, state, expected, job.state
            ))),
        }
    }

    async fn request_cancel(&self, id: &str, now: i64) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ? WHERE id = ? AND state = 'ACTIVE'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn is_cancel_requested(&self, id: &str) -> Result<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(flag.unwrap_or(false))
    }

    async fn heartbeat(&self, id: &str, now: i64) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE jobs SET updated_at = MAX(updated_at, ?) WHERE id = ? AND state = 'ACTIVE'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(updated.rows_affected() > 0)
    }

    async fn mark_stalled(&self, id: &str, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET stalled_at = ?, updated_at = ? WHERE id = ? AND state = 'ACTIVE'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn count_by_state(&self, job_type: &JobType, state: JobState) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE job_type = ? AND state = ?")
            .bind(job_type.as_str())
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> =
            sqlx::query_as("SELECT * FROM jobs WHERE state = ? ORDER BY created_at ASC")
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn purge(&self, filter: &PurgeFilter) -> Result<Vec<JobId>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM jobs WHERE job_type = ");
        query.push_bind(filter.job_type.as_str());
        query.push(" AND finished_at IS NOT NULL AND finished_at < ");
        query.push_bind(filter.finished_before);
        query.push(" AND state IN (");
        let mut states = query.separated(", ");
        for state in &filter.states {
            states.push_bind(state.as_str());
        }
        states.push_unseparated(") RETURNING id");

        query
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    payload: String,
    priority: i32,
    state: String,
    dedupe_key: Option<String>,
    attempts: i32,
    max_attempts: i32,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    visible_at: i64,
    stalled_at: Option<i64>,
    cancel_requested: bool,
    last_error: Option<String>,
    attempt_log: String,
    result: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let state = JobState::from_str(&self.state)?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let attempt_log: Vec<AttemptRecord> = serde_json::from_str(&self.attempt_log)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            job_type: JobType::new(self.job_type),
            payload: JobPayload::new(payload),
            priority: self.priority,
            state,
            dedupe_key: self.dedupe_key,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            visible_at: self.visible_at,
            stalled_at: self.stalled_at,
            cancel_requested: self.cancel_requested,
            last_error: self.last_error,
            attempt_log,
            result,
        })
    }
}
