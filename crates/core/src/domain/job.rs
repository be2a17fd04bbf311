// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job ID (caller-supplied or UUID v4)
pub type JobId = String;

/// Priority (higher number = claimed sooner)
pub type Priority = i32;

/// Lower/upper bounds accepted at enqueue
pub const MIN_PRIORITY: Priority = -1000;
pub const MAX_PRIORITY: Priority = 1000;
pub const MAX_ATTEMPTS_LIMIT: i32 = 25;
pub const MAX_JOB_ID_LEN: usize = 128;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    DeadLetter,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::DeadLetter,
        JobState::Cancelled,
    ];

    pub const TERMINAL: [JobState; 3] = [
        JobState::Completed,
        JobState::DeadLetter,
        JobState::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::DeadLetter | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "WAITING",
            JobState::Active => "ACTIVE",
            JobState::Completed => "COMPLETED",
            JobState::DeadLetter => "DEAD_LETTER",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "WAITING" => Ok(JobState::Waiting),
            "ACTIVE" => Ok(JobState::Active),
            "COMPLETED" => Ok(JobState::Completed),
            "DEAD_LETTER" => Ok(JobState::DeadLetter),
            "CANCELLED" => Ok(JobState::Cancelled),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Job type tag; each registered type owns one worker pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub const IMPORT: &'static str = "import";
    pub const NOTIFICATION: &'static str = "notification";
    pub const GENERATION: &'static str = "generation";
    pub const CACHE_WARM: &'static str = "cache_warm";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn import() -> Self {
        Self::new(Self::IMPORT)
    }

    pub fn notification() -> Self {
        Self::new(Self::NOTIFICATION)
    }

    pub fn generation() -> Self {
        Self::new(Self::GENERATION)
    }

    pub fn cache_warm() -> Self {
        Self::new(Self::CACHE_WARM)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job Payload (JSON serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Deserialize the payload into a handler-specific shape
    pub fn parse<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }
}

/// How a failed attempt is classified by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Consistency,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Permanent => f.write_str("permanent"),
            ErrorClass::Consistency => f.write_str("consistency"),
        }
    }
}

/// One failed attempt, kept for operator remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: i32,
    pub class: ErrorClass,
    pub error: String,
    pub at: i64,
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub priority: Priority,
    pub state: JobState,
    pub dedupe_key: Option<String>,

    // Retry bookkeeping: attempts counts executions started
    pub attempts: i32,
    pub max_attempts: i32,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub visible_at: i64,
    pub stalled_at: Option<i64>,

    pub cancel_requested: bool,
    pub last_error: Option<String>,
    pub attempt_log: Vec<AttemptRecord>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Create a new waiting job
    ///
    /// ID and timestamp are injected (never generated here) so the model stays deterministic.
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        job_type: JobType,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            job_type,
            payload,
            priority: 0,
            state: JobState::Waiting,
            dedupe_key: None,
            attempts: 0,
            max_attempts: 3,
            created_at,
            updated_at: created_at,
            started_at: None,
            finished_at: None,
            visible_at: created_at,
            stalled_at: None,
            cancel_requested: false,
            last_error: None,
            attempt_log: Vec::new(),
            result: None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    pub fn new_test(job_type: JobType, payload: JobPayload) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            job_type,
            payload,
        )
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.state == JobState::Waiting && self.visible_at <= now_millis
    }

    /// WAITING -> ACTIVE; counts the attempt
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        self.expect_state(JobState::Waiting, JobState::Active)?;
        self.state = JobState::Active;
        self.attempts += 1;
        self.started_at = Some(now_millis);
        self.updated_at = now_millis;
        self.stalled_at = None;
        Ok(())
    }

    /// ACTIVE -> COMPLETED
    pub fn complete(&mut self, now_millis: i64, result: serde_json::Value) -> Result<()> {
        self.expect_state(JobState::Active, JobState::Completed)?;
        self.state = JobState::Completed;
        self.result = Some(result);
        self.finished_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// ACTIVE -> WAITING, not claimable before `visible_at`
    pub fn retry_later(
        &mut self,
        now_millis: i64,
        visible_at: i64,
        class: ErrorClass,
        error: impl Into<String>,
    ) -> Result<()> {
        self.expect_state(JobState::Active, JobState::Waiting)?;
        self.record_failure(now_millis, class, error.into());
        self.state = JobState::Waiting;
        self.visible_at = visible_at;
        self.started_at = None;
        self.stalled_at = None;
        Ok(())
    }

    /// ACTIVE -> DEAD_LETTER
    pub fn dead_letter(
        &mut self,
        now_millis: i64,
        class: ErrorClass,
        error: impl Into<String>,
    ) -> Result<()> {
        self.expect_state(JobState::Active, JobState::DeadLetter)?;
        self.record_failure(now_millis, class, error.into());
        self.state = JobState::DeadLetter;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// WAITING | ACTIVE -> CANCELLED
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        if self.state.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Cancelled.to_string(),
            });
        }
        self.state = JobState::Cancelled;
        self.finished_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    fn record_failure(&mut self, now_millis: i64, class: ErrorClass, error: String) {
        self.attempt_log.push(AttemptRecord {
            attempt: self.attempts,
            class,
            error: error.clone(),
            at: now_millis,
        });
        self.last_error = Some(error);
        self.updated_at = now_millis;
    }

    fn expect_state(&self, from: JobState, to: JobState) -> Result<()> {
        if self.state != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new("job-1", 1_000, JobType::notification(), JobPayload::new(json!({})))
    }

    #[test]
    fn test_new_job_is_waiting_and_visible() {
        let job = job();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
        assert!(job.is_claimable(1_000));
        assert!(!job.is_claimable(999));
    }

    #[test]
    fn test_claim_counts_attempt() {
        let mut job = job();
        job.claim(2_000).unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.started_at, Some(2_000));

        // A second claim without settling is rejected
        assert!(job.claim(2_001).is_err());
    }

    #[test]
    fn test_retry_later_records_attempt_history() {
        let mut job = job();
        job.claim(2_000).unwrap();
        job.retry_later(2_500, 3_500, ErrorClass::Transient, "timeout")
            .unwrap();

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.visible_at, 3_500);
        assert_eq!(job.started_at, None);
        assert_eq!(job.last_error.as_deref(), Some("timeout"));
        assert_eq!(job.attempt_log.len(), 1);
        assert_eq!(job.attempt_log[0].attempt, 1);
        assert!(!job.is_claimable(3_000));
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut job = job();
        job.claim(2_000).unwrap();
        job.complete(3_000, json!({"ok": true})).unwrap();

        assert!(job.cancel(4_000).is_err());
        assert!(job.claim(4_000).is_err());
        assert!(job
            .dead_letter(4_000, ErrorClass::Permanent, "late")
            .is_err());
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_state_round_trips_through_text() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert_eq!("dead-letter".parse::<JobState>().unwrap(), JobState::DeadLetter);
        assert!("RUNNING".parse::<JobState>().is_err());
    }
}
