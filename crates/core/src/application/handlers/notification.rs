// Notification handler

use super::{parse_payload, require_non_empty};
use crate::domain::{JobPayload, JobType};
use crate::error::Result;
use crate::port::{HandlerError, JobContext, JobHandler, Notification, NotificationSender};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub struct NotificationHandler {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationHandler {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    fn job_type(&self) -> JobType {
        JobType::notification()
    }

    fn validate(&self, payload: &JobPayload) -> Result<()> {
        let notification: Notification = parse_payload(payload, "notification")?;
        require_non_empty(&notification.recipient, "recipient")?;
        require_non_empty(&notification.subject, "subject")
    }

    async fn handle(&self, ctx: &JobContext) -> std::result::Result<serde_json::Value, HandlerError> {
        let notification: Notification = parse_payload(&ctx.job().payload, "notification")?;
        self.sender.send(&notification).await?;
        info!(
            job_id = %ctx.job().id,
            recipient = %notification.recipient,
            "Notification sent"
        );
        Ok(json!({ "recipient": notification.recipient }))
    }
}
