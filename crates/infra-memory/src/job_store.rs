// In-memory JobStore

use crate::lock;
use async_trait::async_trait;
use jobflow_core::domain::{Job, JobId, JobState, JobType, PurgeFilter};
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::JobStore;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Job records keyed by id
///
/// Every operation takes the single lock, so claims and compare-and-swap transitions are
/// atomic with respect to each other.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs in any state
    pub fn len(&self) -> Result<usize> {
        Ok(lock(&self.jobs)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub(crate) fn terminal_count(&self) -> Result<usize> {
        Ok(lock(&self.jobs)?
            .values()
            .filter(|job| job.state.is_terminal())
            .count())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut jobs = lock(&self.jobs)?;

        if jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("job {} already exists", job.id)));
        }

        if let Some(key) = &job.dedupe_key {
            let holder = jobs
                .values()
                .find(|j| !j.state.is_terminal() && j.dedupe_key.as_ref() == Some(key));
            if let Some(holder) = holder {
                return Err(AppError::DuplicateJob {
                    dedupe_key: key.clone(),
                    existing_job_id: Some(holder.id.clone()),
                });
            }
        }

        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Job>> {
        Ok(lock(&self.jobs)?.get(id).cloned())
    }

    async fn claim_next(&self, job_type: &JobType, now: i64) -> Result<Option<Job>> {
        let mut jobs = lock(&self.jobs)?;

        let next = jobs
            .values()
            .filter(|job| job.job_type == *job_type && job.is_claimable(now))
            .min_by_key(|job| (Reverse(job.priority), job.created_at, job.id.clone()))
            .map(|job| job.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.claim(now)?;
        debug!(job_id = %job.id, job_type = %job_type, "Claimed job");
        Ok(Some(job.clone()))
    }

    async fn transition(&self, job: &Job, expected: JobState) -> Result<()> {
        let mut jobs = lock(&self.jobs)?;

        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job.id)))?;

        if stored.state != expected {
            return Err(AppError::InvalidState(format!(
                "job {} is {}, expected {} (cannot move to {})",
                job.id, stored.state, expected, job.state
            )));
        }
        if stored.cancel_requested && !job.cancel_requested {
            return Err(AppError::Conflict(format!(
                "cancel requested for job {} after it was read",
                job.id
            )));
        }

        // Enqueue-time fields are immutable, like the columns the SQL update leaves alone
        let mut next = job.clone();
        next.job_type = stored.job_type.clone();
        next.payload = stored.payload.clone();
        next.priority = stored.priority;
        next.dedupe_key = stored.dedupe_key.clone();
        next.max_attempts = stored.max_attempts;
        next.created_at = stored.created_at;
        *stored = next;
        Ok(())
    }

    async fn request_cancel(&self, id: &str, now: i64) -> Result<bool> {
        let mut jobs = lock(&self.jobs)?;
        match jobs.get_mut(id) {
            Some(job) if job.state == JobState::Active => {
                job.cancel_requested = true;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_cancel_requested(&self, id: &str) -> Result<bool> {
        Ok(lock(&self.jobs)?
            .get(id)
            .map(|job| job.cancel_requested)
            .unwrap_or(false))
    }

    async fn heartbeat(&self, id: &str, now: i64) -> Result<bool> {
        let mut jobs = lock(&self.jobs)?;
        match jobs.get_mut(id).filter(|j| j.state == JobState::Active) {
            Some(job) => {
                job.updated_at = job.updated_at.max(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_stalled(&self, id: &str, now: i64) -> Result<()> {
        let mut jobs = lock(&self.jobs)?;
        if let Some(job) = jobs.get_mut(id).filter(|j| j.state == JobState::Active) {
            job.stalled_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn count_by_state(&self, job_type: &JobType, state: JobState) -> Result<i64> {
        let count = lock(&self.jobs)?
            .values()
            .filter(|job| job.job_type == *job_type && job.state == state)
            .count();
        Ok(count as i64)
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let mut found: Vec<Job> = lock(&self.jobs)?
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(found)
    }

    async fn purge(&self, filter: &PurgeFilter) -> Result<Vec<JobId>> {
        let mut jobs = lock(&self.jobs)?;

        let doomed: Vec<JobId> = jobs
            .values()
            .filter(|job| {
                job.job_type == filter.job_type
                    && filter.states.contains(&job.state)
                    && job.finished_at.is_some_and(|at| at < filter.finished_before)
            })
            .map(|job| job.id.clone())
            .collect();

        for id in &doomed {
            jobs.remove(id);
        }
        Ok(doomed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow_core::domain::{ErrorClass, JobPayload};
    use serde_json::json;
    use std::sync::Arc;

    fn job(id: &str, created_at: i64) -> Job {
        Job::new(
            id,
            created_at,
            JobType::notification(),
            JobPayload::new(json!({"recipient": "a@b.c", "subject": "hi"})),
        )
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        let store = MemoryJobStore::new();
        store.insert(&job("old-low", 1)).await.unwrap();
        store.insert(&job("new-high", 5).with_priority(10)).await.unwrap();
        store.insert(&job("mid-low", 3)).await.unwrap();

        let ty = JobType::notification();
        let order: Vec<String> = [
            store.claim_next(&ty, 10).await.unwrap().unwrap().id,
            store.claim_next(&ty, 10).await.unwrap().unwrap().id,
            store.claim_next(&ty, 10).await.unwrap().unwrap().id,
        ]
        .to_vec();
        assert_eq!(order, vec!["new-high", "old-low", "mid-low"]);
        assert!(store.claim_next(&ty, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_visibility_and_counts_attempt() {
        let store = MemoryJobStore::new();
        let ty = JobType::notification();
        store.insert(&job("j-1", 1)).await.unwrap();

        let mut claimed = store.claim_next(&ty, 10).await.unwrap().unwrap();
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts, 1);

        claimed
            .retry_later(20, 500, ErrorClass::Transient, "timeout")
            .unwrap();
        store.transition(&claimed, JobState::Active).await.unwrap();

        assert!(store.claim_next(&ty, 499).await.unwrap().is_none());
        let again = store.claim_next(&ty, 500).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.attempt_log.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_write_cannot_clear_cancel_request() {
        let store = MemoryJobStore::new();
        store.insert(&job("j-1", 1)).await.unwrap();
        let mut snapshot = store
            .claim_next(&JobType::notification(), 10)
            .await
            .unwrap()
            .unwrap();
        assert!(store.request_cancel("j-1", 15).await.unwrap());

        snapshot
            .retry_later(20, 500, ErrorClass::Transient, "timeout")
            .unwrap();
        let err = store.transition(&snapshot, JobState::Active).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = store.find_by_id("j-1").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Active);
        assert!(stored.cancel_requested);
    }

    #[tokio::test]
    async fn test_heartbeat_only_touches_active_jobs() {
        let store = MemoryJobStore::new();
        store.insert(&job("j-1", 1)).await.unwrap();
        assert!(!store.heartbeat("j-1", 5).await.unwrap());

        store
            .claim_next(&JobType::notification(), 10)
            .await
            .unwrap()
            .unwrap();
        assert!(store.heartbeat("j-1", 90).await.unwrap());
        assert!(store.heartbeat("j-1", 50).await.unwrap());
        assert_eq!(store.find_by_id("j-1").await.unwrap().unwrap().updated_at, 90);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let store = MemoryJobStore::new();
        store.insert(&job("j-1", 1)).await.unwrap();
        let mut active = store
            .claim_next(&JobType::notification(), 10)
            .await
            .unwrap()
            .unwrap();

        let mut stale = active.clone();
        active.complete(20, json!({"ok": true})).unwrap();
        store.transition(&active, JobState::Active).await.unwrap();

        stale.cancel(21).unwrap();
        let err = store.transition(&stale, JobState::Active).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let missing = job("ghost", 1);
        let err = store.transition(&missing, JobState::Waiting).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dedupe_key_unique_while_live() {
        let store = MemoryJobStore::new();
        store.insert(&job("j-1", 1).with_dedupe_key("k")).await.unwrap();

        let err = store
            .insert(&job("j-2", 2).with_dedupe_key("k"))
            .await
            .unwrap_err();
        match err {
            AppError::DuplicateJob {
                existing_job_id, ..
            } => assert_eq!(existing_job_id.as_deref(), Some("j-1")),
            other => panic!("unexpected error: {other:?}"),
        }

        let mut first = store.find_by_id("j-1").await.unwrap().unwrap();
        first.cancel(5).unwrap();
        store.transition(&first, JobState::Waiting).await.unwrap();
        store.insert(&job("j-3", 6).with_dedupe_key("k")).await.unwrap();

        let err = store.insert(&job("j-3", 7)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cancel_flag_only_for_active() {
        let store = MemoryJobStore::new();
        store.insert(&job("j-1", 1)).await.unwrap();
        assert!(!store.request_cancel("j-1", 5).await.unwrap());

        store
            .claim_next(&JobType::notification(), 10)
            .await
            .unwrap()
            .unwrap();
        assert!(store.request_cancel("j-1", 11).await.unwrap());
        assert!(store.is_cancel_requested("j-1").await.unwrap());
        assert!(!store.is_cancel_requested("nope").await.unwrap());

        store.mark_stalled("j-1", 12).await.unwrap();
        let stored = store.find_by_id("j-1").await.unwrap().unwrap();
        assert_eq!(stored.stalled_at, Some(12));
    }

    #[tokio::test]
    async fn test_purge_only_matching_terminal_jobs() {
        let store = MemoryJobStore::new();
        let ty = JobType::notification();
        for (id, at) in [("a", 1), ("b", 2), ("c", 3)] {
            store.insert(&job(id, at)).await.unwrap();
        }
        for finished_at in [100, 300] {
            let mut active = store.claim_next(&ty, 50).await.unwrap().unwrap();
            active.complete(finished_at, json!({})).unwrap();
            store.transition(&active, JobState::Active).await.unwrap();
        }

        let filter = PurgeFilter::new(ty.clone(), 200, JobState::TERMINAL.to_vec()).unwrap();
        assert_eq!(store.purge(&filter).await.unwrap(), vec!["a".to_string()]);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.count_by_state(&ty, JobState::Waiting).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_hand_out_each_job_once() {
        let store = Arc::new(MemoryJobStore::new());
        for i in 0..50 {
            store.insert(&job(&format!("j-{i:02}"), i)).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store
                    .claim_next(&JobType::notification(), 1_000)
                    .await
                    .unwrap()
                {
                    mine.push(job.id);
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
    }
}
