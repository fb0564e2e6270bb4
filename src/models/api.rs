use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::{JobItem, JobKey, JobOptions, JobRecord, JobStatus, StepResult};

/// Which execution model serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// In-process worker loop; state lives as long as the server process.
    Live,
    /// Tick-driven execution over the external store.
    Durable,
}

/// Request to start a bulk job.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(min = 1, max = 10000))]
    pub items: Vec<JobItem>,

    /// Falls back to the configured default when omitted.
    #[garde(range(min = 0, max = 3600))]
    pub delay_seconds: Option<u64>,

    #[garde(length(min = 1, max = 2048))]
    pub target_url: Option<String>,
}

impl SubmitRequest {
    pub fn options(&self, default_delay_seconds: u64) -> JobOptions {
        JobOptions {
            delay_seconds: self.delay_seconds.unwrap_or(default_delay_seconds),
            target_url: self.target_url.clone(),
        }
    }
}

/// Acknowledgement returned once a job has been accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub key: JobKey,
    pub status: JobStatus,
    pub total: usize,
    pub message: String,
}

/// Read-only projection of a job for progress polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusView {
    pub fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            processed: None,
            total: None,
            last_result: None,
            error: None,
        }
    }

    /// Best-effort answer when the store could not be read.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::idle()
        }
    }

    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            processed: Some(record.processed),
            total: Some(record.total()),
            last_result: record.last_result().cloned(),
            error: None,
        }
    }
}

/// One entry of the live-job snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub key: JobKey,
    #[serde(flatten)]
    pub view: JobStatusView,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            key: record.key(),
            view: JobStatusView::from_record(record),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub action: ControlAction,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TickResponse {
    pub message: String,
    pub status: JobStatus,
    pub processed: usize,
    pub total: usize,
}
