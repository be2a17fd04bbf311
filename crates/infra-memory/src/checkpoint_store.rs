// In-memory CheckpointStore + TermRepository
//
// Checkpoints and terms live under one lock so a batch commit is all-or-nothing.

use crate::lock;
use async_trait::async_trait;
use jobflow_core::domain::{Checkpoint, JobId, Term};
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{BatchCommit, CheckpointStore, CommittedBatch, TermRepository};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
struct ImportState {
    checkpoints: HashMap<JobId, Checkpoint>,
    terms: HashMap<String, Term>,
    /// Batch ids whose next commit attempt fails once
    failing_batches: HashSet<u64>,
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<ImportState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit of `batch_id` fail with a database error, leaving nothing written
    pub fn fail_commit_at(&self, batch_id: u64) -> Result<()> {
        lock(&self.state)?.failing_batches.insert(batch_id);
        Ok(())
    }

    pub(crate) fn checkpoint_count(&self) -> Result<usize> {
        Ok(lock(&self.state)?.checkpoints.len())
    }

    pub(crate) fn term_count(&self) -> Result<usize> {
        Ok(lock(&self.state)?.terms.len())
    }
}

fn upsert_term(terms: &mut HashMap<String, Term>, term: &Term) -> bool {
    match terms.get(&term.name) {
        Some(existing) if existing.content_hash == term.content_hash => false,
        _ => {
            terms.insert(term.name.clone(), term.clone());
            true
        }
    }
}

/// Same guard as the SQL update: batch id matches, not terminal, counters only move forward
fn accepts(stored: Option<&Checkpoint>, next: &Checkpoint, expected_batch_id: u64) -> bool {
    match (stored, expected_batch_id) {
        (None, 0) => true,
        (Some(_), 0) | (None, _) => false,
        (Some(cp), expected) => {
            cp.last_batch_id == expected
                && !cp.terminal
                && cp.rows_processed <= next.rows_processed
                && cp.byte_offset <= next.byte_offset
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<Checkpoint>> {
        Ok(lock(&self.state)?.checkpoints.get(job_id).cloned())
    }

    async fn commit_batch(&self, commit: BatchCommit) -> Result<CommittedBatch> {
        let BatchCommit {
            checkpoint,
            expected_batch_id,
            terms,
        } = commit;
        let mut state = lock(&self.state)?;

        if state.failing_batches.remove(&checkpoint.last_batch_id) {
            return Err(AppError::Database(format!(
                "injected commit failure at batch {}",
                checkpoint.last_batch_id
            )));
        }

        if !accepts(
            state.checkpoints.get(&checkpoint.job_id),
            &checkpoint,
            expected_batch_id,
        ) {
            warn!(
                job_id = %checkpoint.job_id,
                expected_batch_id = expected_batch_id,
                "Checkpoint compare-and-swap failed; batch discarded"
            );
            return Err(AppError::Consistency(format!(
                "checkpoint for job {} is no longer at batch {}",
                checkpoint.job_id, expected_batch_id
            )));
        }

        let mut written = 0u64;
        let mut unchanged = 0u64;
        for term in &terms {
            if upsert_term(&mut state.terms, term) {
                written += 1;
            } else {
                unchanged += 1;
            }
        }

        let checkpoint = checkpoint.with_upserts(written, unchanged);
        state
            .checkpoints
            .insert(checkpoint.job_id.clone(), checkpoint.clone());

        Ok(CommittedBatch {
            checkpoint,
            written,
            unchanged,
        })
    }

    async fn finish(&self, job_id: &str, last_error: Option<&str>, now: i64) -> Result<()> {
        let mut state = lock(&self.state)?;
        if let Some(cp) = state.checkpoints.get_mut(job_id) {
            cp.terminal = true;
            if let Some(err) = last_error {
                cp.last_error = Some(err.to_string());
            }
            cp.updated_at = now;
        }
        Ok(())
    }

    async fn delete(&self, job_ids: &[JobId]) -> Result<u64> {
        let mut state = lock(&self.state)?;
        let removed = job_ids
            .iter()
            .filter(|id| state.checkpoints.remove(id.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn purge_terminal(&self, updated_before: i64) -> Result<u64> {
        let mut state = lock(&self.state)?;
        let before = state.checkpoints.len();
        state
            .checkpoints
            .retain(|_, cp| !(cp.terminal && cp.updated_at < updated_before));
        Ok((before - state.checkpoints.len()) as u64)
    }
}

#[async_trait]
impl TermRepository for MemoryCheckpointStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Term>> {
        Ok(lock(&self.state)?.terms.get(name).cloned())
    }

    async fn count(&self) -> Result<i64> {
        Ok(lock(&self.state)?.terms.len() as i64)
    }

    async fn upsert(&self, term: &Term, _source_job_id: &str) -> Result<bool> {
        Ok(upsert_term(&mut lock(&self.state)?.terms, term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_core::domain::BatchTally;

    fn term(name: &str, definition: &str) -> Term {
        let mut t = Term::new(name);
        t.definition = Some(definition.to_string());
        t.rehash();
        t
    }

    fn tally(records: u64, byte_offset: u64) -> BatchTally {
        BatchTally {
            records,
            byte_offset,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_commits_chain_on_batch_id() {
        let store = MemoryCheckpointStore::new();
        let start = Checkpoint::begin("imp-1", "terms.csv", "digest", None, 1_000);

        let first = store
            .commit_batch(BatchCommit {
                checkpoint: start.advance(&tally(2, 100), 2_000).unwrap(),
                expected_batch_id: 0,
                terms: vec![term("Alpha", "a"), term("Beta", "b")],
            })
            .await
            .unwrap();
        assert_eq!((first.written, first.unchanged), (2, 0));

        let second = store
            .commit_batch(BatchCommit {
                checkpoint: first.checkpoint.advance(&tally(2, 200), 3_000).unwrap(),
                expected_batch_id: 1,
                terms: vec![term("Alpha", "a"), term("Beta", "b2")],
            })
            .await
            .unwrap();
        assert_eq!((second.written, second.unchanged), (1, 1));
        assert_eq!(store.load("imp-1").await.unwrap(), Some(second.checkpoint));
        assert_eq!(
            store.find_by_name("Beta").await.unwrap().unwrap().definition.as_deref(),
            Some("b2")
        );
    }

    #[tokio::test]
    async fn test_replayed_batch_is_rejected_without_writes() {
        let store = MemoryCheckpointStore::new();
        let start = Checkpoint::begin("imp-2", "terms.csv", "digest", None, 1_000);
        let next = start.advance(&tally(1, 10), 2_000).unwrap();

        store
            .commit_batch(BatchCommit {
                checkpoint: next.clone(),
                expected_batch_id: 0,
                terms: vec![term("Alpha", "a")],
            })
            .await
            .unwrap();

        let err = store
            .commit_batch(BatchCommit {
                checkpoint: next,
                expected_batch_id: 0,
                terms: vec![term("Delta", "d")],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Consistency(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryCheckpointStore::new();
        store.fail_commit_at(1).unwrap();
        let start = Checkpoint::begin("imp-3", "terms.csv", "digest", None, 1_000);
        let commit = BatchCommit {
            checkpoint: start.advance(&tally(1, 10), 2_000).unwrap(),
            expected_batch_id: 0,
            terms: vec![term("Alpha", "a")],
        };

        let err = store.commit_batch(commit.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(store.load("imp-3").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);

        store.commit_batch(commit).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_terminal_checkpoint_refuses_commits_and_purges() {
        let store = MemoryCheckpointStore::new();
        let start = Checkpoint::begin("imp-4", "terms.csv", "digest", None, 1_000);
        let first = store
            .commit_batch(BatchCommit {
                checkpoint: start.advance(&tally(1, 10), 2_000).unwrap(),
                expected_batch_id: 0,
                terms: vec![],
            })
            .await
            .unwrap();

        store.finish("imp-4", None, 4_000).await.unwrap();
        let err = store
            .commit_batch(BatchCommit {
                checkpoint: first.checkpoint.advance(&tally(1, 20), 5_000).unwrap(),
                expected_batch_id: 1,
                terms: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Consistency(_)));

        assert_eq!(store.purge_terminal(4_000).await.unwrap(), 0);
        assert_eq!(store.purge_terminal(4_001).await.unwrap(), 1);
    }
}
