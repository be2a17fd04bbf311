// Job Record Store Port (Interface)

use crate::domain::{Job, JobId, JobState, JobType, PurgeFilter};
use crate::error::Result;
use async_trait::async_trait;

/// Durable job metadata with atomic per-job read-modify-write
///
/// Two implementations exist: SQLite (durable) and in-memory. Both must uphold:
/// - `claim_next` is atomic, so no job is ever handed to two workers.
/// - `transition` is a compare-and-swap on the stored state.
/// - a non-terminal job's `dedupe_key` is unique.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job
    ///
    /// # Errors
    /// - `AppError::DuplicateJob` when a non-terminal job holds the same dedupe key
    /// - `AppError::Conflict` when the job id already exists
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Job>>;

    /// Claim the next eligible job of a type
    ///
    /// Picks the WAITING job with `visible_at <= now`, ordered by priority desc, then
    /// created_at asc, then id. The returned job is already ACTIVE with `attempts` incremented
    /// and `started_at = now`.
    async fn claim_next(&self, job_type: &JobType, now: i64) -> Result<Option<Job>>;

    /// Persist `job` only if the stored state still equals `expected`
    ///
    /// A stored `cancel_requested` flag is never cleared: the write is refused when the flag
    /// was set after `job` was read.
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job does not exist
    /// - `AppError::InvalidState` if the stored state moved on (lost race)
    /// - `AppError::Conflict` if a cancel was requested since `job` was read
    async fn transition(&self, job: &Job, expected: JobState) -> Result<()>;

    /// Flag an ACTIVE job for cooperative cancellation; returns false if it is not active
    async fn request_cancel(&self, id: &str, now: i64) -> Result<bool>;

    /// Whether cancellation was requested for the job
    async fn is_cancel_requested(&self, id: &str) -> Result<bool>;

    /// Refresh an ACTIVE job's `updated_at` while its handler runs; false if not active
    async fn heartbeat(&self, id: &str, now: i64) -> Result<bool>;

    /// Record that an ACTIVE job overran its soft execution budget
    async fn mark_stalled(&self, id: &str, now: i64) -> Result<()>;

    /// Count jobs by type and state
    async fn count_by_state(&self, job_type: &JobType, state: JobState) -> Result<i64>;

    /// Find all jobs by state (for recovery)
    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// Delete terminal jobs matching the filter; returns the removed ids
    async fn purge(&self, filter: &PurgeFilter) -> Result<Vec<JobId>>;
}
