// Cache warming handler

use super::parse_payload;
use crate::domain::{JobPayload, JobType};
use crate::error::{AppError, Result};
use crate::port::{CacheWarmer, HandlerError, JobContext, JobHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWarmPayload {
    pub keys: Vec<String>,
}

pub struct CacheWarmHandler {
    warmer: Arc<dyn CacheWarmer>,
}

impl CacheWarmHandler {
    pub fn new(warmer: Arc<dyn CacheWarmer>) -> Self {
        Self { warmer }
    }
}

#[async_trait]
impl JobHandler for CacheWarmHandler {
    fn job_type(&self) -> JobType {
        JobType::cache_warm()
    }

    fn validate(&self, payload: &JobPayload) -> Result<()> {
        let payload: CacheWarmPayload = parse_payload(payload, "cache_warm")?;
        if payload.keys.is_empty() {
            return Err(AppError::Validation("'keys' must not be empty".into()));
        }
        Ok(())
    }

    async fn handle(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, HandlerError> {
        let payload: CacheWarmPayload = parse_payload(&ctx.job().payload, "cache_warm")?;
        let warmed = self.warmer.warm(&payload.keys).await?;
        info!(
            job_id = %ctx.job().id,
            requested = payload.keys.len(),
            warmed = warmed,
            "Cache warmed"
        );
        Ok(json!({ "requested": payload.keys.len(), "warmed": warmed }))
    }
}
