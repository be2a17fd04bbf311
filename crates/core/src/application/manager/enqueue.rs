// Enqueue Use Case

use crate::domain::{
    Job, JobPayload, JobState, JobType, JobTypeConfig, MAX_ATTEMPTS_LIMIT, MAX_JOB_ID_LEN, MAX_PRIORITY,
    MIN_PRIORITY,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobHandler, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};

/// Payloads nested deeper than this are rejected
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Optional enqueue parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Caller-supplied id; a UUID is generated when absent
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Overrides the type's configured retry budget
    #[serde(default)]
    pub max_attempts: Option<i32>,
    /// At most one non-terminal job may hold a given key
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

impl EnqueueOptions {
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// Validate options and payload shape before anything touches the store
pub fn validate_request(options: &EnqueueOptions, payload: &serde_json::Value) -> Result<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&options.priority) {
        return Err(AppError::Validation(format!(
            "priority {} out of range {}..={}",
            options.priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    if let Some(max) = options.max_attempts {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max) {
            return Err(AppError::Validation(format!(
                "max_attempts {} out of range 1..={}",
                max, MAX_ATTEMPTS_LIMIT
            )));
        }
    }
    if let Some(id) = &options.job_id {
        if id.trim().is_empty() {
            return Err(AppError::Validation("job id cannot be empty".into()));
        }
        if id.chars().count() > MAX_JOB_ID_LEN {
            return Err(AppError::Validation(format!(
                "job id too long (max {} characters)",
                MAX_JOB_ID_LEN
            )));
        }
    }
    if let Some(key) = &options.dedupe_key {
        if key.trim().is_empty() {
            return Err(AppError::Validation("dedupe key cannot be empty".into()));
        }
    }
    if json_depth(payload) > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "payload is too deeply nested (max depth {})",
            MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Execute the enqueue use case
///
/// Nothing is persisted unless every check passes. Dedupe is decided atomically by the store.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    store: &dyn JobStore,
    handler: &dyn JobHandler,
    config: &JobTypeConfig,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    job_type: &JobType,
    payload: serde_json::Value,
    options: EnqueueOptions,
) -> Result<Job> {
    validate_request(&options, &payload)?;
    let payload = JobPayload::new(payload);
    handler.validate(&payload)?;

    if let Some(limit) = config.max_waiting {
        let waiting = store
            .count_by_state(job_type, JobState::Waiting)
            .await?;
        if waiting >= limit {
            return Err(AppError::QueueFull(format!(
                "{} has {} waiting jobs (limit {})",
                job_type, waiting, limit
            )));
        }
    }

    let job_id = options
        .job_id
        .unwrap_or_else(|| id_provider.generate_id());
    let mut job = Job::new(job_id, time_provider.now_millis(), job_type.clone(), payload)
        .with_priority(options.priority)
        .with_max_attempts(options.max_attempts.unwrap_or(config.retry.max_attempts));
    if let Some(key) = options.dedupe_key {
        job = job.with_dedupe_key(key);
    }

    store.insert(&job).await?;
    Ok(job)
}
