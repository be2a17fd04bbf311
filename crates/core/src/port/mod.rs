// Port Layer - Interfaces for external dependencies

pub mod checkpoint_store;
pub mod event;
pub mod handler;
pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod maintenance;
pub mod outbound;
pub mod record_source;
pub mod term_repository;
pub mod time_provider;

// Re-exports
pub use checkpoint_store::{BatchCommit, CheckpointStore, CommittedBatch};
pub use event::{EventBus, EventObserver, TracingObserver};
pub use handler::{HandlerError, JobContext, JobHandler};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_store::JobStore;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use outbound::{
    CacheWarmer, ContentGenerator, GenerationRequest, Notification, NotificationSender,
    OutboundError,
};
pub use record_source::{
    RawRecord, RecordError, RecordSource, SourceEvent, SourceFormat, SourceOpener, SourceSpec,
};
pub use term_repository::TermRepository;
pub use time_provider::{SystemTimeProvider, TimeProvider};
