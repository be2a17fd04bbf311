// Checkpoint Store Port - import progress committed together with imported terms

use crate::domain::{Checkpoint, JobId, Term};
use crate::error::Result;
use async_trait::async_trait;

/// One batch ready to be committed
#[derive(Debug, Clone)]
pub struct BatchCommit {
    /// Checkpoint after this batch, upsert counts not yet applied
    pub checkpoint: Checkpoint,
    /// `last_batch_id` the stored checkpoint must still have (0 = none stored yet)
    pub expected_batch_id: u64,
    pub terms: Vec<Term>,
}

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    pub checkpoint: Checkpoint,
    /// Terms inserted or rewritten
    pub written: u64,
    /// Terms whose content hash already matched
    pub unchanged: u64,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of an import job
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>>;

    /// Upsert the batch's terms and move the checkpoint, as one atomic unit
    ///
    /// The checkpoint write is a compare-and-swap on `expected_batch_id`; it also refuses to
    /// move `rows_processed` or `byte_offset` backwards.
    ///
    /// # Errors
    /// - `AppError::Consistency` when the CAS fails; nothing from the batch is kept
    async fn commit_batch(&self, commit: BatchCommit) -> Result<CommittedBatch>;

    /// Mark the checkpoint terminal (no-op when none exists)
    async fn finish(&self, job_id: &str, last_error: Option<&str>, now: i64) -> Result<()>;

    /// Delete checkpoints of the given jobs
    async fn delete(&self, job_ids: &[JobId]) -> Result<u64>;

    /// Delete terminal checkpoints last updated before `updated_before`
    async fn purge_terminal(&self, updated_before: i64) -> Result<u64>;
}
