// Import job payload

use crate::domain::{ImportConfig, JobPayload};
use crate::error::{AppError, Result};
use crate::port::SourceFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPayload {
    /// Path or URI of the structured source
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SourceFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Known record count, skips the counting pre-pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
}

impl ImportPayload {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            format: None,
            batch_size: None,
            total_rows: None,
        }
    }

    pub fn from_payload(payload: &JobPayload) -> Result<Self> {
        payload
            .parse()
            .map_err(|e| AppError::Validation(format!("invalid import payload: {}", e)))
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Explicit format, else inferred from the source extension
    pub fn resolve_format(&self) -> Result<SourceFormat> {
        self.format
            .or_else(|| SourceFormat::infer(&self.source))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "cannot infer the format of '{}'; set \"format\" to csv or jsonl",
                    self.source
                ))
            })
    }

    pub fn batch_size(&self, config: &ImportConfig) -> usize {
        self.batch_size.unwrap_or(config.batch_size)
    }

    pub fn validate(&self, config: &ImportConfig) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(AppError::Validation("import source must not be empty".into()));
        }
        self.resolve_format()?;
        let batch_size = self.batch_size(config);
        if !(1..=config.max_batch_size).contains(&batch_size) {
            return Err(AppError::Validation(format!(
                "batch_size must be within 1..={}, got {}",
                config.max_batch_size, batch_size
            )));
        }
        Ok(())
    }
}
