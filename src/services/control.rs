use async_trait::async_trait;

use crate::models::api::{ControlAction, JobStatusView};
use crate::models::job::{JobItem, JobKey, JobOptions, JobStatus, RecordError};
use crate::services::store::StoreError;

/// Operations every execution model exposes for a job key.
///
/// Implemented by the in-process [`JobWorker`](crate::services::worker::JobWorker)
/// and the store-backed [`TickExecutor`](crate::services::ticker::TickExecutor).
#[async_trait]
pub trait JobControl: Send + Sync {
    /// Accept a new job. Fails with [`JobError::AlreadyActive`] while a
    /// non-terminal job exists for the key.
    async fn submit(
        &self,
        key: JobKey,
        items: Vec<JobItem>,
        options: JobOptions,
    ) -> Result<JobStatusView, JobError>;

    /// Read-only projection; `idle` for unknown keys.
    async fn status(&self, key: &JobKey) -> JobStatusView;

    /// Apply pause/resume/cancel and return the job's status afterwards.
    ///
    /// Cancel is acknowledged immediately but observed at the next step
    /// boundary, so the returned status may still be `running`.
    async fn control(&self, key: &JobKey, action: ControlAction) -> Result<JobStatus, JobError>;

    /// Forget the job entirely. Resetting an unknown key succeeds.
    async fn reset(&self, key: &JobKey) -> Result<(), JobError>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("No job exists for {0}")]
    NotFound(JobKey),

    #[error("Job {key} is still {status}; cancel or reset it first")]
    AlreadyActive { key: JobKey, status: JobStatus },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("Invalid job request: {0}")]
    Invalid(String),

    #[error("Job {0} was advanced concurrently; its last item may be re-attempted")]
    Conflict(JobKey),

    #[error("Ticking is only available for durable jobs")]
    TickUnsupported,

    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    /// Stable machine-readable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "job_not_found",
            Self::AlreadyActive { .. } => "job_already_active",
            Self::Record(RecordError::InvalidTransition { .. } | RecordError::Terminal(_)) => {
                "invalid_transition"
            }
            Self::Record(RecordError::Invalid(_)) | Self::Invalid(_) => "invalid_job",
            Self::Record(RecordError::Exhausted | RecordError::Corrupt(_)) => "job_corrupt",
            Self::Conflict(_) | Self::Store(StoreError::Conflict(_)) => "write_conflict",
            Self::TickUnsupported => "tick_unsupported",
            Self::Store(_) => "store_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobKind;

    #[test]
    fn test_error_codes_are_stable() {
        let key = JobKey::new(JobKind::Webhook, "site-1").unwrap();
        assert_eq!(JobError::NotFound(key.clone()).code(), "job_not_found");
        assert_eq!(
            JobError::AlreadyActive {
                key: key.clone(),
                status: JobStatus::Running
            }
            .code(),
            "job_already_active"
        );
        assert_eq!(
            JobError::from(RecordError::Terminal(JobStatus::Complete)).code(),
            "invalid_transition"
        );
        assert_eq!(
            JobError::from(RecordError::Invalid("x".into())).code(),
            "invalid_job"
        );
        assert_eq!(
            JobError::from(StoreError::Conflict(key.to_string())).code(),
            "write_conflict"
        );
        assert_eq!(JobError::Conflict(key).code(), "write_conflict");
        assert_eq!(JobError::TickUnsupported.code(), "tick_unsupported");
    }
}
