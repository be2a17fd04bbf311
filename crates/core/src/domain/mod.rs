// Domain Layer - Pure business logic and entities

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod job;
pub mod queue;
pub mod term;

// Re-exports
pub use checkpoint::{BatchTally, Checkpoint, ImportProgress, ImportSummary};
pub use error::DomainError;
pub use event::JobEvent;
pub use job::{
    AttemptRecord, ErrorClass, Job, JobId, JobPayload, JobState, JobType, Priority,
    MAX_ATTEMPTS_LIMIT, MAX_JOB_ID_LEN, MAX_PRIORITY, MIN_PRIORITY,
};
pub use queue::{
    ImportConfig, JobTypeConfig, PurgeFilter, QueueDepth, RateLimitConfig, RetryConfig,
};
pub use term::{ContentSection, Term};
