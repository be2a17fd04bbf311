// Outbound Ports - downstream services called by the fan-out handlers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboundError {
    /// Timeouts, connection failures, 5xx and 429
    #[error("transient outbound failure: {0}")]
    Transient(String),

    /// The downstream refused the request (other 4xx)
    #[error("outbound request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub term: String,
    pub section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsection: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), OutboundError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Generate the text of one term section
    async fn generate(&self, request: &GenerationRequest) -> Result<String, OutboundError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheWarmer: Send + Sync {
    /// Warm the given keys; returns how many were refreshed
    async fn warm(&self, keys: &[String]) -> Result<u64, OutboundError>;
}
