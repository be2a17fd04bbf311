use thiserror::Error;

/// Rule violations detected by the domain model itself, before any storage is touched
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("job cannot move from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("'{0}' is not a job state")]
    UnknownState(String),

    #[error("checkpoint rejected: {0}")]
    InvalidCheckpoint(String),

    #[error("{0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
