// Job Handler Port - per-type execution logic invoked by the worker pool

use crate::domain::{ErrorClass, ImportProgress, Job, JobEvent, JobPayload, JobType};
use crate::error::{AppError, Result};
use crate::port::event::EventBus;
use crate::port::job_store::JobStore;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Handler failure, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Retryable (I/O timeout, downstream 5xx, failed commit)
    #[error("transient: {0}")]
    Transient(String),

    /// Dead-letters immediately (malformed input)
    #[error("permanent: {0}")]
    Permanent(String),

    /// Stored progress disagrees with the data; needs an operator
    #[error("consistency: {0}")]
    Consistency(String),

    /// Handler observed a cancellation request and stopped
    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn transient(msg: impl Into<String>) -> Self {
        HandlerError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        HandlerError::Permanent(msg.into())
    }

    /// Class used for retry decisions; `None` for cancellation
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            HandlerError::Transient(_) => Some(ErrorClass::Transient),
            HandlerError::Permanent(_) => Some(ErrorClass::Permanent),
            HandlerError::Consistency(_) => Some(ErrorClass::Consistency),
            HandlerError::Cancelled => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            HandlerError::Transient(m)
            | HandlerError::Permanent(m)
            | HandlerError::Consistency(m) => m.clone(),
            HandlerError::Cancelled => "cancelled".to_string(),
        }
    }
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Consistency(msg) => HandlerError::Consistency(msg),
            AppError::Validation(_)
            | AppError::Serialization(_)
            | AppError::InvalidJobType(_)
            | AppError::NotFound(_)
            | AppError::Config(_)
            | AppError::Domain(_) => HandlerError::Permanent(err.to_string()),
            other => HandlerError::Transient(other.to_string()),
        }
    }
}

/// Everything a handler gets for one execution
pub struct JobContext {
    job: Job,
    cancel: CancellationToken,
    store: Arc<dyn JobStore>,
    events: EventBus,
}

impl JobContext {
    pub fn new(job: Job, cancel: CancellationToken, store: Arc<dyn JobStore>, events: EventBus) -> Self {
        Self {
            job,
            cancel,
            store,
            events,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cooperative cancellation check for batch/record boundaries
    ///
    /// The in-process token covers cancels issued by this process; the stored flag covers
    /// cancels issued by another process sharing the store.
    pub async fn is_cancelled(&self) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        match self.store.is_cancel_requested(&self.job.id).await {
            Ok(true) => {
                self.cancel.cancel();
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Cancel flag lookup failed");
                false
            }
        }
    }

    pub fn report_progress(&self, progress: ImportProgress) {
        self.events.publish(JobEvent::Progress {
            job_id: self.job.id.clone(),
            job_type: self.job.job_type.clone(),
            progress,
        });
    }
}

/// Handler trait, one implementation per job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Reject bad payloads at enqueue time
    fn validate(&self, _payload: &JobPayload) -> Result<()> {
        Ok(())
    }

    /// Execute the job; the returned value becomes the job's result
    async fn handle(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// One scripted handler invocation
    #[derive(Debug, Clone)]
    pub enum Step {
        Succeed,
        Transient(String),
        Permanent(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
        /// Poll the cancellation check until it fires
        WaitForCancel,
    }

    /// Handler that replays a script, then repeats the fallback step
    pub struct ScriptedHandler {
        job_type: JobType,
        script: Mutex<VecDeque<Step>>,
        fallback: Step,
        required_field: Option<String>,
        calls: Mutex<Vec<(String, Instant)>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl ScriptedHandler {
        pub fn new(job_type: JobType, fallback: Step) -> Self {
            Self {
                job_type,
                script: Mutex::new(VecDeque::new()),
                fallback,
                required_field: None,
                calls: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }
        }

        pub fn succeeding(job_type: JobType) -> Self {
            Self::new(job_type, Step::Succeed)
        }

        pub fn with_script(self, steps: Vec<Step>) -> Self {
            *self.script.lock().unwrap() = steps.into();
            self
        }

        /// `validate` rejects payloads without this top-level field
        pub fn requiring_field(mut self, field: impl Into<String>) -> Self {
            self.required_field = Some(field.into());
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls_for(&self, job_id: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == job_id)
                .map(|(_, at)| *at)
                .collect()
        }

        pub fn max_concurrency(&self) -> usize {
            self.max_running.load(Ordering::SeqCst)
        }
    }

    struct RunningGuard<'a>(&'a AtomicUsize);

    impl Drop for RunningGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        fn job_type(&self) -> JobType {
            self.job_type.clone()
        }

        fn validate(&self, payload: &JobPayload) -> Result<()> {
            match &self.required_field {
                Some(field) if payload.as_value().get(field).is_none() => Err(
                    AppError::Validation(format!("payload is missing '{}'", field)),
                ),
                _ => Ok(()),
            }
        }

        async fn handle(
            &self,
            ctx: &JobContext,
        ) -> std::result::Result<serde_json::Value, HandlerError> {
            self.calls
                .lock()
                .unwrap()
                .push((ctx.job().id.clone(), Instant::now()));
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            let _guard = RunningGuard(&self.running);

            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            match step {
                Step::Succeed => Ok(serde_json::json!({"handled": ctx.job().id})),
                Step::Transient(msg) => Err(HandlerError::Transient(msg)),
                Step::Permanent(msg) => Err(HandlerError::Permanent(msg)),
                Step::Panic(msg) => panic!("{}", msg),
                Step::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(serde_json::json!({"slept_ms": d.as_millis() as u64}))
                }
                Step::WaitForCancel => loop {
                    if ctx.is_cancelled().await {
                        return Err(HandlerError::Cancelled);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                },
            }
        }
    }
}
