// Crash recovery: orphaned ACTIVE jobs after a restart
use crate::application::worker::constants::{
    DEFAULT_RECOVERY_WINDOW_MS, ORPHANED_FINAL_ATTEMPT_ERROR, ORPHANED_REQUEUE_ERROR,
};
use crate::domain::{ErrorClass, Job, JobState};
use crate::error::{AppError, Result};
use crate::port::{JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// What recovery did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.requeued + self.dead_lettered + self.cancelled
    }
}

/// Crash recovery service
///
/// Detects ACTIVE jobs whose owner is gone. A running worker heartbeats its job's
/// `updated_at`, so a job is orphaned once neither its start nor its last heartbeat falls
/// inside the window. Handlers are never force-killed; recovery only rewrites the stored
/// state.
pub struct RecoveryService {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window_ms: i64,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// `recovery_window_ms` defaults to 5 minutes. It must stay well above the worker
    /// heartbeat interval or live jobs look orphaned.
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window_ms: Option<i64>,
    ) -> Self {
        Self {
            store,
            time_provider,
            recovery_window_ms: recovery_window_ms.unwrap_or(DEFAULT_RECOVERY_WINDOW_MS),
        }
    }

    /// Recover orphaned jobs
    ///
    /// 1. Find all ACTIVE jobs last seen (started or heartbeat) at or before `now - window`
    /// 2. Cancel requested before the crash: cancel
    /// 3. Attempts left: requeue immediately (the attempt is recorded as transient)
    /// 4. Final attempt already used, or no `started_at`: dead-letter
    pub async fn recover_orphaned_jobs(&self) -> Result<RecoveryReport> {
        let now = self.time_provider.now_millis();
        let cutoff = now.saturating_sub(self.recovery_window_ms);

        info!(
            cutoff_time = cutoff,
            recovery_window_ms = self.recovery_window_ms,
            "Starting orphaned job recovery"
        );

        let mut report = RecoveryReport::default();
        for job in self.store.find_by_state(JobState::Active).await? {
            match job.started_at {
                Some(started_at) if started_at.max(job.updated_at) > cutoff => continue,
                Some(_) => self.recover_or_reread(job, now, &mut report).await?,
                None => {
                    warn!(job_id = %job.id, "ACTIVE job without started_at, dead-lettering");
                    self.dead_letter(job, now, "active without start time", &mut report)
                        .await?;
                }
            }
        }

        info!(
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            cancelled = report.cancelled,
            "Orphaned job recovery complete"
        );
        Ok(report)
    }

    /// A cancel request can land between the scan and the write; the job is then re-read
    async fn recover_or_reread(
        &self,
        job: Job,
        now: i64,
        report: &mut RecoveryReport,
    ) -> Result<()> {
        let job_id = job.id.clone();
        match self.recover_single_job(job, now, report).await {
            Err(AppError::Conflict(_)) => match self.store.find_by_id(&job_id).await? {
                Some(fresh) if fresh.state == JobState::Active => {
                    self.recover_single_job(fresh, now, report).await
                }
                _ => Ok(()),
            },
            other => other,
        }
    }

    async fn recover_single_job(
        &self,
        mut job: Job,
        now: i64,
        report: &mut RecoveryReport,
    ) -> Result<()> {
        if job.cancel_requested {
            job.cancel(now)?;
            self.store.transition(&job, JobState::Active).await?;
            info!(job_id = %job.id, "Orphaned job had a pending cancel; cancelled");
            report.cancelled += 1;
            return Ok(());
        }

        if job.attempts >= job.max_attempts {
            return self
                .dead_letter(job, now, ORPHANED_FINAL_ATTEMPT_ERROR, report)
                .await;
        }

        job.retry_later(now, now, ErrorClass::Transient, ORPHANED_REQUEUE_ERROR)?;
        self.store.transition(&job, JobState::Active).await?;
        info!(job_id = %job.id, attempt = job.attempts, "Orphaned job requeued");
        report.requeued += 1;
        Ok(())
    }

    async fn dead_letter(
        &self,
        mut job: Job,
        now: i64,
        reason: &str,
        report: &mut RecoveryReport,
    ) -> Result<()> {
        job.dead_letter(now, ErrorClass::Transient, reason)?;
        self.store.transition(&job, JobState::Active).await?;
        warn!(job_id = %job.id, reason = reason, "Orphaned job dead-lettered");
        report.dead_lettered += 1;
        Ok(())
    }
}
