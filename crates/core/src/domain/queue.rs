// Queue Domain Model - per-type tunables and queue views

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{JobState, JobType, MAX_ATTEMPTS_LIMIT};
use serde::{Deserialize, Serialize};

/// Retry policy parameters for one job type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: i32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction in [0, 1): delay is scaled by (1 +/- jitter)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(DomainError::ValidationError(format!(
                "retry.max_attempts must be within 1..={}, got {}",
                MAX_ATTEMPTS_LIMIT, self.max_attempts
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(DomainError::ValidationError(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(DomainError::ValidationError(format!(
                "retry.jitter must be within [0, 1), got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Token bucket parameters: `capacity` tokens, `refill_tokens` per `refill_interval_ms`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_tokens: u32,
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

fn default_refill_interval_ms() -> u64 {
    1000
}

impl RateLimitConfig {
    pub fn per_second(capacity: u32, refill_tokens: u32) -> Self {
        Self {
            capacity,
            refill_tokens,
            refill_interval_ms: 1000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.refill_tokens == 0 || self.refill_interval_ms == 0 {
            return Err(DomainError::ValidationError(
                "rate_limit capacity, refill_tokens and refill_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Worker pool configuration for one job type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTypeConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// Soft budget; exceeding it marks the job stalled without killing it
    pub execution_budget_secs: u64,
    /// Enqueue backpressure: reject when this many jobs are already waiting
    pub max_waiting: Option<i64>,
    pub retry: RetryConfig,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for JobTypeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 250,
            execution_budget_secs: 60,
            max_waiting: None,
            retry: RetryConfig::default(),
            rate_limit: None,
        }
    }
}

impl JobTypeConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Defaults for the well-known job types
    pub fn defaults_for(job_type: &JobType) -> Self {
        match job_type.as_str() {
            JobType::IMPORT => Self {
                concurrency: 2,
                execution_budget_secs: 15 * 60,
                ..Default::default()
            },
            JobType::NOTIFICATION => Self {
                concurrency: 10,
                rate_limit: Some(RateLimitConfig::per_second(20, 20)),
                ..Default::default()
            },
            JobType::GENERATION => Self {
                concurrency: 10,
                rate_limit: Some(RateLimitConfig::per_second(10, 10)),
                ..Default::default()
            },
            JobType::CACHE_WARM => Self::new(4),
            _ => Self::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_max_waiting(mut self, max_waiting: i64) -> Self {
        self.max_waiting = Some(max_waiting);
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_execution_budget_secs(mut self, secs: u64) -> Self {
        self.execution_budget_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(DomainError::ValidationError(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.execution_budget_secs == 0 {
            return Err(DomainError::ValidationError(
                "poll_interval_ms and execution_budget_secs must be > 0".into(),
            ));
        }
        if let Some(max) = self.max_waiting {
            if max < 1 {
                return Err(DomainError::ValidationError(format!(
                    "max_waiting must be >= 1, got {}",
                    max
                )));
            }
        }
        self.retry.validate()?;
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

/// Batch importer tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub max_batch_size: usize,
    /// Count source records up front so progress can report a total
    pub count_total_rows: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_batch_size: 1000,
            count_total_rows: true,
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || !(1..=self.max_batch_size).contains(&self.batch_size) {
            return Err(DomainError::ValidationError(format!(
                "import.batch_size must be within 1..={}, got {}",
                self.max_batch_size, self.batch_size
            )));
        }
        Ok(())
    }
}

/// Per-state job counts for one type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub dead_letter: i64,
    pub cancelled: i64,
}

impl QueueDepth {
    pub fn set(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Waiting => self.waiting = count,
            JobState::Active => self.active = count,
            JobState::Completed => self.completed = count,
            JobState::DeadLetter => self.dead_letter = count,
            JobState::Cancelled => self.cancelled = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.waiting + self.active + self.completed + self.dead_letter + self.cancelled
    }
}

/// Which terminal jobs a purge removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeFilter {
    pub job_type: JobType,
    /// Jobs finished strictly before this epoch ms are removed
    pub finished_before: i64,
    pub states: Vec<JobState>,
}

impl PurgeFilter {
    pub fn new(job_type: JobType, finished_before: i64, states: Vec<JobState>) -> Result<Self> {
        if states.is_empty() {
            return Err(DomainError::ValidationError(
                "purge needs at least one state".into(),
            ));
        }
        if let Some(state) = states.iter().find(|s| !s.is_terminal()) {
            return Err(DomainError::ValidationError(format!(
                "purge only accepts terminal states, got {}",
                state
            )));
        }
        Ok(Self {
            job_type,
            finished_before,
            states,
        })
    }
}
