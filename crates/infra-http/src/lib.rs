//! Outbound HTTP adapters
//!
//! One `reqwest` client serves the notification, generation and cache endpoints. Every failure
//! is classified here: throttling, server errors and network trouble are transient, any other
//! rejection is permanent.

use async_trait::async_trait;
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{
    CacheWarmer, ContentGenerator, GenerationRequest, Notification, NotificationSender,
    OutboundError,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

type OutboundResult<T> = std::result::Result<T, OutboundError>;

/// Endpoints and timeout for outbound calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOutboundConfig {
    pub notification_url: Option<String>,
    pub generation_url: Option<String>,
    pub cache_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HttpOutboundConfig {
    fn default() -> Self {
        Self {
            notification_url: None,
            generation_url: None,
            cache_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Deserialize)]
struct GenerationResponse {
    content: String,
}

#[derive(Serialize)]
struct CacheWarmRequest<'a> {
    keys: &'a [String],
}

#[derive(Deserialize)]
struct CacheWarmResponse {
    warmed: u64,
}

/// Classify a non-success status: 429 and 5xx are transient
pub fn classify_status(status: StatusCode, detail: &str) -> OutboundError {
    let message = format!("{}: {}", status, detail);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        OutboundError::Transient(message)
    } else {
        OutboundError::Rejected(message)
    }
}

fn classify_error(err: reqwest::Error) -> OutboundError {
    if let Some(status) = err.status() {
        return classify_status(status, &err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
    {
        OutboundError::Transient(err.to_string())
    } else {
        OutboundError::Rejected(err.to_string())
    }
}

pub struct HttpOutboundClient {
    client: Client,
    config: HttpOutboundConfig,
}

impl HttpOutboundClient {
    pub fn new(config: HttpOutboundConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpOutboundConfig {
        &self.config
    }

    fn endpoint<'a>(url: &'a Option<String>, name: &str) -> OutboundResult<&'a str> {
        url.as_deref().ok_or_else(|| {
            warn!(endpoint = name, "Outbound endpoint is not configured");
            OutboundError::Rejected(format!("no {} endpoint configured", name))
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> OutboundResult<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            let err = classify_status(status, detail.trim());
            warn!(url = url, status = %status, error = %err, "Outbound call failed");
            return Err(err);
        }

        debug!(url = url, status = %status, "Outbound call succeeded");
        Ok(response)
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> OutboundResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post(url, body)
            .await?
            .json::<T>()
            .await
            .map_err(classify_error)
    }
}

#[async_trait]
impl NotificationSender for HttpOutboundClient {
    async fn send(&self, notification: &Notification) -> OutboundResult<()> {
        let url = Self::endpoint(&self.config.notification_url, "notification")?;
        self.post(url, notification).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentGenerator for HttpOutboundClient {
    async fn generate(&self, request: &GenerationRequest) -> OutboundResult<String> {
        let url = Self::endpoint(&self.config.generation_url, "generation")?;
        let response: GenerationResponse = self.post_json(url, request).await?;
        Ok(response.content)
    }
}

#[async_trait]
impl CacheWarmer for HttpOutboundClient {
    async fn warm(&self, keys: &[String]) -> OutboundResult<u64> {
        let url = Self::endpoint(&self.config.cache_url, "cache")?;
        let response: CacheWarmResponse = self.post_json(url, &CacheWarmRequest { keys }).await?;
        Ok(response.warmed)
    }
}
