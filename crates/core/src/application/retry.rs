// Retry policy: pure decision from (config, attempts, error class)
use crate::domain::{ErrorClass, Job, RetryConfig};
use tracing::{info, warn};

/// Upper bound on a single backoff delay (24h)
pub const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Why a job was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    NonRetryable(ErrorClass),
    AttemptsExhausted,
}

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue, invisible for this many ms
    Retry { delay_ms: u64 },
    /// Terminal; retained for inspection
    DeadLetter(DeadLetterReason),
}

/// Retry policy for one job type
///
/// Stateless: the decision depends only on the config, the job's attempt count and id, and the
/// error class, so replaying it yields the same delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what happens after a failed attempt
    ///
    /// `job.attempts` is the number of attempts already made (the claim counts them). The job's
    /// own `max_attempts` (validated at enqueue) caps the retries.
    pub fn should_retry(&self, job: &Job, class: ErrorClass) -> RetryDecision {
        if !class.is_retryable() {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                class = %class,
                "Non-retryable failure"
            );
            return RetryDecision::DeadLetter(DeadLetterReason::NonRetryable(class));
        }

        if job.attempts >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::DeadLetter(DeadLetterReason::AttemptsExhausted);
        }

        let retry_index = (job.attempts - 1).max(0) as u32;
        let delay_ms = self.backoff_delay_ms(&job.id, retry_index);

        info!(
            job_id = %job.id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            delay_ms = delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry { delay_ms }
    }

    /// delay = base * multiplier^n * (1 + jitter * u), u in [-1, 1] seeded by (job id, n)
    pub fn backoff_delay_ms(&self, job_id: &str, retry_index: u32) -> u64 {
        let exp = self.config.multiplier.powi(retry_index as i32);
        let nominal = self.config.base_delay_ms as f64 * exp;
        let factor = 1.0 + self.config.jitter * jitter_unit(job_id, retry_index);
        let delay = (nominal * factor).round();
        if !delay.is_finite() || delay >= MAX_RETRY_DELAY_MS as f64 {
            MAX_RETRY_DELAY_MS
        } else {
            delay.max(0.0) as u64
        }
    }
}

/// Deterministic value in [-1, 1] for (job id, retry index)
fn jitter_unit(job_id: &str, retry_index: u32) -> f64 {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in job_id
        .as_bytes()
        .iter()
        .chain(retry_index.to_le_bytes().iter())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % 2001) as f64 / 1000.0 - 1.0
}
