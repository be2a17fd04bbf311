// Outbound Handlers - fan-out job types that call downstream services

pub mod cache_warm;
pub mod generation;
pub mod notification;

pub use cache_warm::{CacheWarmHandler, CacheWarmPayload};
pub use generation::{GenerationHandler, MIN_GENERATED_LEN};
pub use notification::NotificationHandler;

use crate::domain::JobPayload;
use crate::error::{AppError, Result};
use crate::port::{HandlerError, OutboundError};
use serde::de::DeserializeOwned;

impl From<OutboundError> for HandlerError {
    fn from(err: OutboundError) -> Self {
        match err {
            OutboundError::Transient(msg) => HandlerError::Transient(msg),
            OutboundError::Rejected(msg) => HandlerError::Permanent(msg),
        }
    }
}

/// Deserialize a handler payload, naming the job type on failure
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: &JobPayload, kind: &str) -> Result<T> {
    payload
        .parse()
        .map_err(|e| AppError::Validation(format!("invalid {} payload: {}", kind, e)))
}

pub(crate) fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("'{}' must not be empty", field)));
    }
    Ok(())
}
