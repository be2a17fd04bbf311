// Application Layer - Use Cases and Business Logic

pub mod handlers;
pub mod import;
pub mod maintenance;
pub mod manager;
pub mod rate_limiter;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use handlers::{CacheWarmHandler, GenerationHandler, NotificationHandler};
pub use import::{BatchImporter, ImportPayload, RowMapper};
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use manager::{CancelOutcome, EngineHandle, EnqueueOptions, JobQueueManager, JobStatus};
pub use rate_limiter::RateLimiter;
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{DeadLetterReason, RetryDecision, RetryPolicy};
pub use worker::{shutdown_channel, CancelRegistry, ShutdownSender, ShutdownToken, WorkerPool};
