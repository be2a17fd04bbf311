// Import Checkpoint Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};

/// Persisted progress of one import job
///
/// `rows_processed` is the number of source records consumed and doubles as the resume index.
/// It only moves forward, and it is written in the same transaction as the batch it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: JobId,
    pub source_ref: String,
    pub header_digest: String,
    pub byte_offset: u64,
    pub rows_processed: u64,
    pub rows_imported: u64,
    pub rows_unchanged: u64,
    pub rows_skipped: u64,
    pub rows_errored: u64,
    pub last_batch_id: u64,
    pub total_rows: Option<u64>,
    pub last_error: Option<String>,
    pub terminal: bool,
    pub updated_at: i64,
}

/// What one batch contributed before its terms hit the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub records: u64,
    pub byte_offset: u64,
    pub skipped: u64,
    pub errored: u64,
    pub last_error: Option<String>,
}

impl Checkpoint {
    /// Zero-progress checkpoint; only persisted with the first batch
    pub fn begin(
        job_id: impl Into<JobId>,
        source_ref: impl Into<String>,
        header_digest: impl Into<String>,
        total_rows: Option<u64>,
        now_millis: i64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            source_ref: source_ref.into(),
            header_digest: header_digest.into(),
            byte_offset: 0,
            rows_processed: 0,
            rows_imported: 0,
            rows_unchanged: 0,
            rows_skipped: 0,
            rows_errored: 0,
            last_batch_id: 0,
            total_rows,
            last_error: None,
            terminal: false,
            updated_at: now_millis,
        }
    }

    /// Checkpoint describing this one plus the next batch
    ///
    /// Upsert counts are filled in by the store inside the commit transaction.
    pub fn advance(&self, tally: &BatchTally, now_millis: i64) -> Result<Checkpoint> {
        if self.terminal {
            return Err(DomainError::InvalidCheckpoint(format!(
                "checkpoint for job {} is terminal",
                self.job_id
            )));
        }
        if tally.byte_offset < self.byte_offset {
            return Err(DomainError::InvalidCheckpoint(format!(
                "byte offset would move backwards: {} -> {}",
                self.byte_offset, tally.byte_offset
            )));
        }

        let mut next = self.clone();
        next.byte_offset = tally.byte_offset;
        next.rows_processed += tally.records;
        next.rows_skipped += tally.skipped;
        next.rows_errored += tally.errored;
        next.last_batch_id += 1;
        if tally.last_error.is_some() {
            next.last_error = tally.last_error.clone();
        }
        next.updated_at = now_millis;
        Ok(next)
    }

    /// Fold the store's upsert outcome into the checkpoint
    pub fn with_upserts(mut self, written: u64, unchanged: u64) -> Self {
        self.rows_imported += written;
        self.rows_unchanged += unchanged;
        self
    }

    pub fn progress(&self) -> ImportProgress {
        ImportProgress {
            rows_processed: self.rows_processed,
            rows_imported: self.rows_imported,
            rows_unchanged: self.rows_unchanged,
            rows_skipped: self.rows_skipped,
            rows_errored: self.rows_errored,
            total_rows: self.total_rows,
            last_batch_id: self.last_batch_id,
        }
    }

    pub fn summary(&self, resumed_from: u64) -> ImportSummary {
        ImportSummary {
            rows_processed: self.rows_processed,
            rows_imported: self.rows_imported,
            rows_unchanged: self.rows_unchanged,
            rows_skipped: self.rows_skipped,
            rows_errored: self.rows_errored,
            batches_committed: self.last_batch_id,
            resumed_from,
        }
    }
}

/// Progress exposed through the status API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub rows_processed: u64,
    pub rows_imported: u64,
    pub rows_unchanged: u64,
    pub rows_skipped: u64,
    pub rows_errored: u64,
    pub total_rows: Option<u64>,
    pub last_batch_id: u64,
}

/// Result stored on a completed import job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub rows_processed: u64,
    pub rows_imported: u64,
    pub rows_unchanged: u64,
    pub rows_skipped: u64,
    pub rows_errored: u64,
    pub batches_committed: u64,
    pub resumed_from: u64,
}
