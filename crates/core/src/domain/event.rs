// Job lifecycle events (fire-and-forget notifications)

use crate::domain::checkpoint::ImportProgress;
use crate::domain::job::{JobId, JobType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        job_type: JobType,
        priority: i32,
    },
    Started {
        job_id: JobId,
        job_type: JobType,
        attempt: i32,
    },
    Progress {
        job_id: JobId,
        job_type: JobType,
        progress: ImportProgress,
    },
    Retrying {
        job_id: JobId,
        job_type: JobType,
        attempt: i32,
        delay_ms: u64,
        error: String,
    },
    Completed {
        job_id: JobId,
        job_type: JobType,
        attempt: i32,
    },
    DeadLettered {
        job_id: JobId,
        job_type: JobType,
        attempt: i32,
        error: String,
    },
    Cancelled {
        job_id: JobId,
        job_type: JobType,
    },
    Stalled {
        job_id: JobId,
        job_type: JobType,
        budget_secs: u64,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Enqueued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Retrying { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::DeadLettered { job_id, .. }
            | JobEvent::Cancelled { job_id, .. }
            | JobEvent::Stalled { job_id, .. } => job_id,
        }
    }

    /// True for events that end a job's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::DeadLettered { .. } | JobEvent::Cancelled { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Enqueued { .. } => "enqueued",
            JobEvent::Started { .. } => "started",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Retrying { .. } => "retrying",
            JobEvent::Completed { .. } => "completed",
            JobEvent::DeadLettered { .. } => "dead_lettered",
            JobEvent::Cancelled { .. } => "cancelled",
            JobEvent::Stalled { .. } => "stalled",
        }
    }
}
