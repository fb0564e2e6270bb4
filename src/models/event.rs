use serde::Serialize;

use crate::models::job::{JobKey, JobStatus, StepResult};

/// Incremental update published by the in-process worker.
///
/// Events carry only the fields that changed so observers can merge them into
/// their own view of the job identified by `key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerEvent {
    pub key: JobKey,
    #[serde(flatten)]
    pub update: JobUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum JobUpdate {
    Started {
        total: usize,
    },
    Progress {
        processed: usize,
        total: usize,
        result: StepResult,
    },
    CountdownTick {
        remaining_seconds: u64,
    },
    Paused,
    Resumed,
    Done {
        status: JobStatus,
        processed: usize,
        total: usize,
    },
}

impl WorkerEvent {
    pub fn new(key: &JobKey, update: JobUpdate) -> Self {
        Self {
            key: key.clone(),
            update,
        }
    }

    /// Name used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self.update {
            JobUpdate::Started { .. } => "started",
            JobUpdate::Progress { .. } => "progress",
            JobUpdate::CountdownTick { .. } => "countdown-tick",
            JobUpdate::Paused => "paused",
            JobUpdate::Resumed => "resumed",
            JobUpdate::Done { .. } => "done",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobKind;

    #[test]
    fn test_event_serializes_flat_with_kebab_tag() {
        let key = JobKey::new(JobKind::Registration, "site-1").unwrap();
        let event = WorkerEvent::new(
            &key,
            JobUpdate::CountdownTick {
                remaining_seconds: 2,
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "countdown-tick");
        assert_eq!(value["remaining_seconds"], 2);
        assert_eq!(value["key"]["tenant"], "site-1");
        assert_eq!(event.name(), "countdown-tick");
    }
}
