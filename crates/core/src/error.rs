use thiserror::Error;

/// Error type shared by every jobflow crate.
///
/// Storage adapters translate their driver errors into [`AppError::Database`]
/// or [`AppError::Conflict`]; handlers see these through
/// [`HandlerError`](crate::port::HandlerError), which decides retryability.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] crate::domain::DomainError),

    #[error("no handler registered for job type '{0}'")]
    InvalidJobType(String),

    /// Another non-terminal job already holds the key
    #[error("dedupe key '{dedupe_key}' is held by a live job")]
    DuplicateJob {
        dedupe_key: String,
        existing_job_id: Option<String>,
    },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("operation not allowed in current state: {0}")]
    InvalidState(String),

    /// Persisted progress disagrees with the data being processed
    #[error("inconsistent progress: {0}")]
    Consistency(String),

    #[error("queue at capacity: {0}")]
    QueueFull(String),

    #[error("storage failure: {0}")]
    Database(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bad configuration: {0}")]
    Config(String),

    #[error("internal failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
