// Worker Pool - one per job type, claims and executes jobs

pub mod constants;
mod control;
mod shutdown;

use constants::*;
pub use control::{CancelRegistry, PoolControl};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::rate_limiter::RateLimiter;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{ErrorClass, Job, JobEvent, JobState, JobType, JobTypeConfig};
use crate::error::{AppError, Result};
use crate::port::{EventBus, HandlerError, JobContext, JobHandler, JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

enum Claim {
    Job(Job),
    Empty,
    Throttled(Duration),
}

enum Outcome {
    Succeeded(serde_json::Value),
    Failed(HandlerError),
    Panicked(String),
}

/// Bounded set of execution slots dedicated to one job type
pub struct WorkerPool {
    job_type: JobType,
    config: JobTypeConfig,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    retry_policy: RetryPolicy,
    rate_limiter: Option<RateLimiter>,
    time_provider: Arc<dyn TimeProvider>,
    events: EventBus,
    cancels: Arc<CancelRegistry>,
    control: PoolControl,
    slots: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        config: JobTypeConfig,
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        events: EventBus,
        cancels: Arc<CancelRegistry>,
    ) -> Self {
        let rate_limiter = config
            .rate_limit
            .as_ref()
            .map(|rl| RateLimiter::new(rl, Arc::clone(&time_provider)));
        Self {
            job_type: handler.job_type(),
            retry_policy: RetryPolicy::new(config.retry.clone()),
            slots: Arc::new(Semaphore::new(config.concurrency)),
            config,
            store,
            handler,
            rate_limiter,
            time_provider,
            events,
            cancels,
            control: PoolControl::new(),
        }
    }

    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn config(&self) -> &JobTypeConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    pub fn control(&self) -> &PoolControl {
        &self.control
    }

    /// Executions currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.config.concurrency - self.slots.available_permits()
    }

    /// Run the claim loop until shutdown, then drain in-flight executions
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            job_type = %self.job_type,
            concurrency = self.config.concurrency,
            "Worker pool started"
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown.is_shutdown() {
                info!(job_type = %self.job_type, "Worker pool shutting down");
                break;
            }

            if self.control.is_paused() {
                info!(job_type = %self.job_type, "Worker pool paused");
                tokio::select! {
                    _ = self.control.wait_until_resumed() => {
                        info!(job_type = %self.job_type, "Worker pool resumed");
                        continue;
                    }
                    _ = shutdown.wait() => break,
                }
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.wait() => break,
            };

            // Paused while waiting for a slot
            if self.control.is_paused() {
                continue;
            }

            match self.try_claim().await {
                Ok(Claim::Job(job)) => {
                    let pool = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        pool.execute(job).await;
                    });
                }
                Ok(Claim::Throttled(wait)) => {
                    drop(permit);
                    tokio::select! {
                        _ = sleep(wait.max(MIN_THROTTLE_SLEEP)) => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Ok(Claim::Empty) => {
                    drop(permit);
                    tokio::select! {
                        _ = sleep(poll_interval) => {},
                        _ = self.control.woken() => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(job_type = %self.job_type, error = %e, "Worker pool claim failed");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }

        self.drain().await;
        info!(job_type = %self.job_type, "Worker pool stopped");
        Ok(())
    }

    /// Claim one job and execute it inline (returns true if a job was processed)
    ///
    /// Ignores the slot semaphore; used for one-shot processing and tests.
    pub async fn process_next_job(&self) -> Result<bool> {
        match self.try_claim().await? {
            Claim::Job(job) => {
                self.execute(job).await;
                Ok(true)
            }
            Claim::Empty | Claim::Throttled(_) => Ok(false),
        }
    }

    async fn try_claim(&self) -> Result<Claim> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.try_acquire() {
                return Ok(Claim::Throttled(limiter.time_until_available()));
            }
        }

        let now = self.time_provider.now_millis();
        let claimed = self.store.claim_next(&self.job_type, now).await;
        if !matches!(claimed, Ok(Some(_))) {
            if let Some(limiter) = &self.rate_limiter {
                limiter.refund();
            }
        }
        Ok(match claimed? {
            Some(job) => Claim::Job(job),
            None => Claim::Empty,
        })
    }

    async fn execute(&self, job: Job) {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            "Processing job"
        );
        self.events.publish(JobEvent::Started {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            attempt: job.attempts,
        });

        // Handler runs in its own task so a panic cannot take the pool down
        let token = self.cancels.register(&job.id);
        let ctx = JobContext::new(
            job.clone(),
            token,
            Arc::clone(&self.store),
            self.events.clone(),
        );
        let handler = Arc::clone(&self.handler);
        let mut handle = tokio::spawn(async move { handler.handle(&ctx).await });

        let budget = sleep(Duration::from_secs(self.config.execution_budget_secs));
        tokio::pin!(budget);
        let mut beats = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
        let mut stalled = false;
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                _ = &mut budget, if !stalled => {
                    stalled = true;
                    self.flag_stalled(&job).await;
                }
                _ = beats.tick() => self.heartbeat(&job).await,
            }
        };
        self.cancels.remove(&job.id);

        let outcome = match joined {
            Ok(Ok(value)) => Outcome::Succeeded(value),
            Ok(Err(err)) => Outcome::Failed(err),
            Err(join_err) => Outcome::Panicked(panic_message(join_err)),
        };

        let job_id = job.id.clone();
        if let Err(e) = self.settle(job, outcome).await {
            error!(job_id = %job_id, error = %e, "Failed to settle job");
        }
    }

    /// Keeps a live job out of recovery's reach
    async fn heartbeat(&self, job: &Job) {
        let now = self.time_provider.now_millis();
        if let Err(e) = self.store.heartbeat(&job.id, now).await {
            warn!(job_id = %job.id, error = %e, "Heartbeat failed");
        }
    }

    async fn flag_stalled(&self, job: &Job) {
        let now = self.time_provider.now_millis();
        warn!(
            job_id = %job.id,
            budget_secs = self.config.execution_budget_secs,
            "Job exceeded its execution budget; marking stalled"
        );
        if let Err(e) = self.store.mark_stalled(&job.id, now).await {
            error!(job_id = %job.id, error = %e, "Failed to mark job stalled");
        }
        self.events.publish(JobEvent::Stalled {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            budget_secs: self.config.execution_budget_secs,
        });
    }

    /// Persist the outcome with a CAS from ACTIVE
    async fn settle(&self, claimed: Job, outcome: Outcome) -> Result<()> {
        match self.settle_once(&claimed, &outcome).await {
            // The cancel flag only ever goes up, so one fresh read is enough
            Err(AppError::Conflict(reason)) => {
                debug!(job_id = %claimed.id, reason = %reason, "Cancel requested during settle; re-reading");
                self.settle_once(&claimed, &outcome).await
            }
            other => other,
        }
    }

    async fn settle_once(&self, claimed: &Job, outcome: &Outcome) -> Result<()> {
        let now = self.time_provider.now_millis();

        // Re-read so flags written while the handler ran (cancel request, stall mark) survive
        let job = match self.store.find_by_id(&claimed.id).await? {
            Some(current) if current.state == JobState::Active => current,
            Some(current) => {
                warn!(
                    job_id = %claimed.id,
                    state = %current.state,
                    "Job left ACTIVE while running; outcome dropped"
                );
                return Ok(());
            }
            None => {
                warn!(job_id = %claimed.id, "Job disappeared while running; outcome dropped");
                return Ok(());
            }
        };

        match outcome {
            Outcome::Succeeded(result) => self.finish_completed(job, now, result.clone()).await,
            Outcome::Failed(err) => match err.class() {
                None => self.finish_cancelled(job, now).await,
                Some(_) if job.cancel_requested => self.finish_cancelled(job, now).await,
                Some(class) => self.finish_failed(job, now, class, err.message()).await,
            },
            Outcome::Panicked(msg) => {
                error!(job_id = %job.id, panic = %msg, "Job handler panicked");
                if job.cancel_requested {
                    return self.finish_cancelled(job, now).await;
                }
                self.finish_failed(job, now, ErrorClass::Permanent, msg.clone()).await
            }
        }
    }

    async fn finish_completed(&self, mut job: Job, now: i64, result: serde_json::Value) -> Result<()> {
        job.complete(now, result)?;
        self.store.transition(&job, JobState::Active).await?;
        info!(job_id = %job.id, attempt = job.attempts, "Job completed");
        self.events.publish(JobEvent::Completed {
            job_id: job.id,
            job_type: job.job_type,
            attempt: job.attempts,
        });
        Ok(())
    }

    async fn finish_cancelled(&self, mut job: Job, now: i64) -> Result<()> {
        job.cancel(now)?;
        self.store.transition(&job, JobState::Active).await?;
        info!(job_id = %job.id, "Job cancelled while running");
        self.events.publish(JobEvent::Cancelled {
            job_id: job.id,
            job_type: job.job_type,
        });
        Ok(())
    }

    async fn finish_failed(
        &self,
        mut job: Job,
        now: i64,
        class: ErrorClass,
        error: String,
    ) -> Result<()> {
        match self.retry_policy.should_retry(&job, class) {
            RetryDecision::Retry { delay_ms } => {
                job.retry_later(now, now + delay_ms as i64, class, error.clone())?;
                self.store.transition(&job, JobState::Active).await?;
                info!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    delay_ms = delay_ms,
                    error = %error,
                    "Retrying job after failure"
                );
                self.events.publish(JobEvent::Retrying {
                    job_id: job.id,
                    job_type: job.job_type,
                    attempt: job.attempts,
                    delay_ms,
                    error,
                });
            }
            RetryDecision::DeadLetter(reason) => {
                job.dead_letter(now, class, error.clone())?;
                self.store.transition(&job, JobState::Active).await?;
                error!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    reason = ?reason,
                    error = %error,
                    "Job dead-lettered"
                );
                self.events.publish(JobEvent::DeadLettered {
                    job_id: job.id,
                    job_type: job.job_type,
                    attempt: job.attempts,
                    error,
                });
            }
        }
        Ok(())
    }

    async fn drain(&self) {
        let total = self.config.concurrency as u32;
        match timeout(DRAIN_TIMEOUT, self.slots.acquire_many(total)).await {
            Ok(_) => {}
            Err(_) => warn!(
                job_type = %self.job_type,
                in_flight = self.in_flight(),
                "Drain timed out; unfinished jobs stay ACTIVE until recovery"
            ),
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task was aborted".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
