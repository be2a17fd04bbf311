// Job Queue Manager - public facade over stores, pools, retry and recovery

pub mod enqueue;

pub use enqueue::{validate_request, EnqueueOptions, MAX_PAYLOAD_DEPTH};

use crate::application::recovery::{RecoveryReport, RecoveryService};
use crate::application::worker::constants::RECOVERY_SCAN_INTERVAL;
use crate::application::worker::{shutdown_channel, CancelRegistry, ShutdownSender, WorkerPool};
use crate::domain::{
    ImportProgress, Job, JobEvent, JobId, JobState, JobType, JobTypeConfig, PurgeFilter,
    QueueDepth,
};
use crate::error::{AppError, Result};
use crate::port::{
    CheckpointStore, EventBus, EventObserver, IdProvider, JobHandler, JobStore,
    SystemTimeProvider, TimeProvider, UuidProvider,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

/// Job snapshot plus import progress when a checkpoint exists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ImportProgress>,
}

/// What `cancel` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was WAITING and is now CANCELLED
    Cancelled,
    /// The job is ACTIVE; its handler will stop at the next boundary
    Requested,
}

pub struct JobQueueManagerBuilder {
    store: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    observers: Vec<Arc<dyn EventObserver>>,
    handlers: Vec<(Arc<dyn JobHandler>, JobTypeConfig)>,
    recovery_window_ms: Option<i64>,
}

impl JobQueueManagerBuilder {
    pub fn id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.id_provider = id_provider;
        self
    }

    pub fn time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Register a handler with explicit pool settings
    pub fn register(mut self, handler: Arc<dyn JobHandler>, config: JobTypeConfig) -> Self {
        self.handlers.push((handler, config));
        self
    }

    /// Register a handler with the built-in settings for its type
    pub fn register_default(self, handler: Arc<dyn JobHandler>) -> Self {
        let config = JobTypeConfig::defaults_for(&handler.job_type());
        self.register(handler, config)
    }

    /// Only ACTIVE jobs started more than this long ago count as orphaned
    pub fn recovery_window_ms(mut self, window_ms: i64) -> Self {
        self.recovery_window_ms = Some(window_ms);
        self
    }

    pub fn build(self) -> Result<JobQueueManager> {
        let events = EventBus::new(self.observers);
        let cancels = Arc::new(CancelRegistry::default());
        let mut pools = HashMap::new();

        for (handler, config) in self.handlers {
            let job_type = handler.job_type();
            config
                .validate()
                .map_err(|e| AppError::Config(format!("{}: {}", job_type, e)))?;
            if pools.contains_key(&job_type) {
                return Err(AppError::Config(format!(
                    "handler for {} registered twice",
                    job_type
                )));
            }
            let pool = WorkerPool::new(
                handler,
                config,
                Arc::clone(&self.store),
                Arc::clone(&self.time_provider),
                events.clone(),
                Arc::clone(&cancels),
            );
            pools.insert(job_type, Arc::new(pool));
        }

        Ok(JobQueueManager {
            recovery: Arc::new(RecoveryService::new(
                Arc::clone(&self.store),
                Arc::clone(&self.time_provider),
                self.recovery_window_ms,
            )),
            store: self.store,
            checkpoints: self.checkpoints,
            id_provider: self.id_provider,
            time_provider: self.time_provider,
            events,
            cancels,
            pools,
        })
    }
}

/// Explicit engine value; constructed with its stores, never a global
pub struct JobQueueManager {
    store: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    events: EventBus,
    cancels: Arc<CancelRegistry>,
    pools: HashMap<JobType, Arc<WorkerPool>>,
    recovery: Arc<RecoveryService>,
}

impl JobQueueManager {
    pub fn builder(
        store: Arc<dyn JobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> JobQueueManagerBuilder {
        JobQueueManagerBuilder {
            store,
            checkpoints,
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
            observers: Vec::new(),
            handlers: Vec::new(),
            recovery_window_ms: None,
        }
    }

    /// Registered job types
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.pools.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    pub fn pool(&self, job_type: &JobType) -> Option<&Arc<WorkerPool>> {
        self.pools.get(job_type)
    }

    fn pool_for(&self, job_type: &JobType) -> Result<&Arc<WorkerPool>> {
        self.pools
            .get(job_type)
            .ok_or_else(|| AppError::InvalidJobType(job_type.to_string()))
    }

    /// Enqueue a job; returns its id
    ///
    /// # Errors
    /// - `InvalidJobType` when no handler is registered for the type
    /// - `Validation` for bad options or a payload the handler rejects
    /// - `QueueFull` when the type's `max_waiting` is reached
    /// - `DuplicateJob` when a non-terminal job holds the dedupe key
    pub async fn enqueue(
        &self,
        job_type: &JobType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        let pool = self.pool_for(job_type)?;
        let job = enqueue::execute(
            self.store.as_ref(),
            pool.handler().as_ref(),
            pool.config(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            job_type,
            payload,
            options,
        )
        .await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            "Job enqueued"
        );
        self.events.publish(JobEvent::Enqueued {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            priority: job.priority,
        });
        pool.control().wake();
        Ok(job.id)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        let progress = if job.job_type == JobType::import() {
            self.checkpoints
                .load(job_id)
                .await?
                .map(|cp| cp.progress())
        } else {
            None
        };
        Ok(JobStatus { job, progress })
    }

    /// Cancel a job
    ///
    /// WAITING jobs are cancelled at once; ACTIVE jobs get a cooperative cancel request.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
        let now = self.time_provider.now_millis();

        match job.state {
            JobState::Waiting => {
                let mut cancelled = job;
                cancelled.cancel(now)?;
                match self.store.transition(&cancelled, JobState::Waiting).await {
                    Ok(()) => {
                        info!(job_id = %job_id, "Waiting job cancelled");
                        self.events.publish(JobEvent::Cancelled {
                            job_id: cancelled.id,
                            job_type: cancelled.job_type,
                        });
                        Ok(CancelOutcome::Cancelled)
                    }
                    // Claimed between the read and the CAS
                    Err(AppError::InvalidState(_)) => self.request_active_cancel(job_id, now).await,
                    Err(e) => Err(e),
                }
            }
            JobState::Active => self.request_active_cancel(job_id, now).await,
            state => Err(AppError::InvalidState(format!(
                "job {} is already {}",
                job_id, state
            ))),
        }
    }

    async fn request_active_cancel(&self, job_id: &str, now: i64) -> Result<CancelOutcome> {
        if self.store.request_cancel(job_id, now).await? {
            let local = self.cancels.cancel(job_id);
            info!(job_id = %job_id, running_here = local, "Cancellation requested");
            return Ok(CancelOutcome::Requested);
        }

        let state = self
            .store
            .find_by_id(job_id)
            .await?
            .map(|job| job.state)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
        if state.is_terminal() {
            Err(AppError::InvalidState(format!(
                "job {} is already {}",
                job_id, state
            )))
        } else {
            Err(AppError::Conflict(format!(
                "job {} changed state during cancel; try again",
                job_id
            )))
        }
    }

    /// Stop a type's pool from claiming; in-flight jobs finish
    pub fn pause(&self, job_type: &JobType) -> Result<()> {
        self.pool_for(job_type)?.control().pause();
        info!(job_type = %job_type, "Job type paused");
        Ok(())
    }

    pub fn resume(&self, job_type: &JobType) -> Result<()> {
        self.pool_for(job_type)?.control().resume();
        info!(job_type = %job_type, "Job type resumed");
        Ok(())
    }

    pub fn is_paused(&self, job_type: &JobType) -> Result<bool> {
        Ok(self.pool_for(job_type)?.control().is_paused())
    }

    /// Delete terminal jobs finished more than `older_than` ago, plus their checkpoints
    ///
    /// Returns the number of jobs removed.
    pub async fn purge(
        &self,
        job_type: &JobType,
        older_than: Duration,
        states: Vec<JobState>,
    ) -> Result<u64> {
        let age_ms = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let finished_before = self.time_provider.now_millis().saturating_sub(age_ms);
        let filter = PurgeFilter::new(job_type.clone(), finished_before, states)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let ids = self.store.purge(&filter).await?;
        let checkpoints = self.checkpoints.delete(&ids).await?;
        info!(
            job_type = %job_type,
            jobs = ids.len(),
            checkpoints = checkpoints,
            "Purged terminal jobs"
        );
        Ok(ids.len() as u64)
    }

    pub async fn queue_depth(&self, job_type: &JobType) -> Result<QueueDepth> {
        let mut depth = QueueDepth::default();
        for state in JobState::ALL {
            depth.set(state, self.store.count_by_state(job_type, state).await?);
        }
        Ok(depth)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Resolve once the job is terminal
    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<Job> {
        // Subscribe before reading so a transition between the two is not missed
        let mut rx = self.events.subscribe();
        loop {
            let job = self
                .store
                .find_by_id(job_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
            if job.state.is_terminal() {
                return Ok(job);
            }

            loop {
                match rx.recv().await {
                    Ok(event) if event.job_id() == job_id && event.is_terminal() => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(job_id = %job_id, skipped = skipped, "Event subscriber lagged");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AppError::Internal("event channel closed".into()))
                    }
                }
            }
        }
    }

    /// Requeue or dead-letter jobs left ACTIVE by a previous process
    pub async fn recover_orphaned(&self) -> Result<RecoveryReport> {
        self.recovery.recover_orphaned_jobs().await
    }

    /// Run recovery, then start every pool plus a periodic orphan scan
    ///
    /// Other processes may share the store: recovery only touches jobs that have not
    /// heartbeated within the recovery window.
    pub async fn start(&self) -> Result<EngineHandle> {
        let report = self.recover_orphaned().await?;
        if report.total() > 0 {
            info!(
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                cancelled = report.cancelled,
                "Recovered orphaned jobs"
            );
        }

        let mut handle = self.start_pools();
        let recovery = Arc::clone(&self.recovery);
        let mut stop = handle.shutdown.token();
        handle.scanner = Some(tokio::spawn(async move {
            let mut ticks = interval_at(
                Instant::now() + RECOVERY_SCAN_INTERVAL,
                RECOVERY_SCAN_INTERVAL,
            );
            loop {
                tokio::select! {
                    _ = stop.wait() => break,
                    _ = ticks.tick() => {
                        if let Err(e) = recovery.recover_orphaned_jobs().await {
                            warn!(error = %e, "Periodic orphan scan failed");
                        }
                    }
                }
            }
        }));
        Ok(handle)
    }

    /// Start every pool without touching jobs other processes may own
    pub fn start_pools(&self) -> EngineHandle {
        let (shutdown, token) = shutdown_channel();
        let tasks = self
            .pools
            .values()
            .map(|pool| {
                let pool = Arc::clone(pool);
                let job_type = pool.job_type().clone();
                (job_type, tokio::spawn(pool.run(token.clone())))
            })
            .collect();
        info!(pools = self.pools.len(), "Job engine started");
        EngineHandle {
            shutdown,
            tasks,
            scanner: None,
        }
    }
}

/// Running pools; dropping it leaves them running until the runtime stops
pub struct EngineHandle {
    shutdown: ShutdownSender,
    tasks: Vec<(JobType, JoinHandle<Result<()>>)>,
    scanner: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop claiming and wait for in-flight executions to drain
    pub async fn shutdown(self) {
        self.shutdown.shutdown();
        if let Some(scanner) = self.scanner {
            if let Err(e) = scanner.await {
                error!(error = %e, "Orphan scan task panicked");
            }
        }
        for (job_type, task) in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(job_type = %job_type, error = %e, "Worker pool failed"),
                Err(e) => error!(job_type = %job_type, error = %e, "Worker pool task panicked"),
            }
        }
        info!("Job engine stopped");
    }
}
