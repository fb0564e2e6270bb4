//! Tick-driven stateless executor.
//!
//! Every call to [`TickExecutor::tick`] loads a job from the store, performs at
//! most one item and persists the result with a version-conditional write.
//! Progress therefore depends on an external caller ticking repeatedly; the
//! `ticker` binary is one such caller.
//!
//! Execution is at-least-once: if the progress write fails after the
//! downstream call succeeded, the next tick re-attempts the same item.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::api::{ControlAction, JobStatusView, TickResponse};
use crate::models::job::{
    JobItem, JobKey, JobOptions, JobRecord, JobStatus, RecordError, Revision, StepResult,
};
use crate::services::control::{JobControl, JobError};
use crate::services::step::{self, StepExecutor};
use crate::services::store::{JobStore, StoreError};

/// Conditional writes retried before giving up with a conflict.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// One item was processed.
    Advanced(StepResult),
    /// Every item has been processed; nothing to do.
    AlreadyComplete,
    /// The job is paused; ticking it is a no-op.
    Paused,
    /// A pending cancel was applied on this tick.
    Canceled,
    /// The job already ended as canceled or failed.
    Finished,
    /// The inter-item delay has not elapsed yet.
    Waiting(Duration),
}

/// Outcome of a tick plus the job's position afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub status: JobStatus,
    pub processed: usize,
    pub total: usize,
}

impl TickReport {
    fn new(outcome: TickOutcome, record: &JobRecord) -> Self {
        Self {
            outcome,
            status: record.status,
            processed: record.processed,
            total: record.total(),
        }
    }
}

impl From<TickReport> for TickResponse {
    fn from(report: TickReport) -> Self {
        Self {
            message: report.to_string(),
            status: report.status,
            processed: report.processed,
            total: report.total,
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (processed, total) = (self.processed, self.total);
        match &self.outcome {
            TickOutcome::Advanced(result) => {
                write!(
                    f,
                    "Processed {processed}/{total}: {} {} ({})",
                    result.item.label(),
                    result.outcome,
                    result.detail
                )?;
                if self.status == JobStatus::Complete {
                    write!(f, "; job complete")?;
                }
                Ok(())
            }
            TickOutcome::AlreadyComplete => write!(f, "Already complete ({processed}/{total})"),
            TickOutcome::Paused => write!(f, "Paused at {processed}/{total}"),
            TickOutcome::Canceled => write!(f, "Canceled at {processed}/{total}"),
            TickOutcome::Finished => write!(f, "Job is {} at {processed}/{total}", self.status),
            TickOutcome::Waiting(remaining) => write!(
                f,
                "Waiting {}s before the next item ({processed}/{total})",
                remaining.as_secs_f64().ceil() as u64
            ),
        }
    }
}

/// Advances store-backed jobs one item per call.
pub struct TickExecutor {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn StepExecutor>,
}

impl TickExecutor {
    pub fn new(store: Arc<dyn JobStore>, executor: Arc<dyn StepExecutor>) -> Self {
        Self { store, executor }
    }

    /// Advance the job stored under `key` by at most one item.
    pub async fn tick(&self, key: &JobKey) -> Result<TickReport, JobError> {
        let mut record = self.load(key).await?;

        match self.store.read_control(key).await? {
            Some(ControlAction::Cancel) => {
                let was_terminal = record.is_terminal();
                let record = self
                    .update(key, |r| {
                        if r.is_terminal() {
                            Ok(false)
                        } else {
                            r.transition(JobStatus::Canceled)
                        }
                    })
                    .await?;
                self.store.clear_control(key, ControlAction::Cancel).await?;
                if was_terminal {
                    return Ok(TickReport::new(TickOutcome::Finished, &record));
                }
                tracing::info!(job = %key, processed = record.processed, "Durable job canceled");
                return Ok(TickReport::new(TickOutcome::Canceled, &record));
            }
            Some(action) => {
                let target = match action {
                    ControlAction::Pause => JobStatus::Paused,
                    _ => JobStatus::Running,
                };
                record = self
                    .update(key, |r| {
                        let resuming_unpaused =
                            target == JobStatus::Running && r.status != JobStatus::Paused;
                        if r.is_terminal() || resuming_unpaused {
                            Ok(false)
                        } else {
                            r.transition(target)
                        }
                    })
                    .await?;
                self.store.clear_control(key, action).await?;
            }
            None => {}
        }

        match record.status {
            JobStatus::Paused => return Ok(TickReport::new(TickOutcome::Paused, &record)),
            JobStatus::Complete => {
                return Ok(TickReport::new(TickOutcome::AlreadyComplete, &record))
            }
            JobStatus::Canceled | JobStatus::Failed => {
                return Ok(TickReport::new(TickOutcome::Finished, &record))
            }
            _ => {}
        }

        if record.is_exhausted() {
            let record = self
                .update(key, |r| {
                    if r.is_terminal() {
                        Ok(false)
                    } else {
                        r.transition(JobStatus::Complete)
                    }
                })
                .await?;
            return Ok(TickReport::new(TickOutcome::AlreadyComplete, &record));
        }

        if let Some(next) = record.next_step_at() {
            let now = Utc::now();
            if next > now {
                let remaining = (next - now).to_std().unwrap_or_default();
                return Ok(TickReport::new(TickOutcome::Waiting(remaining), &record));
            }
        }

        let cursor = record.processed;
        let Some(result) = step::advance(&*self.executor, &mut record).await? else {
            return Ok(TickReport::new(TickOutcome::AlreadyComplete, &record));
        };
        self.persist_step(&mut record, cursor, &result).await?;

        Ok(TickReport::new(TickOutcome::Advanced(result), &record))
    }

    /// Tick every job in the store that has not finished.
    ///
    /// Paused jobs are ticked too so a pending cancel is still consumed.
    /// Returns how many jobs were ticked; per-job errors are logged.
    pub async fn tick_all(&self) -> Result<usize, JobError> {
        let mut ticked = 0;
        for key in self.store.list_keys().await? {
            match self.store.load(&key).await {
                Ok(Some(record)) if !record.is_terminal() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(job = %key, error = %e, "Skipping unreadable job");
                    continue;
                }
            }
            match self.tick(&key).await {
                Ok(report) => {
                    ticked += 1;
                    tracing::debug!(job = %key, message = %report, "Ticked job");
                }
                Err(e) => tracing::error!(job = %key, error = %e, code = e.code(), "Tick failed"),
            }
        }
        Ok(ticked)
    }

    async fn load(&self, key: &JobKey) -> Result<JobRecord, JobError> {
        self.store
            .load(key)
            .await?
            .ok_or_else(|| JobError::NotFound(key.clone()))
    }

    /// Reload, apply a status change and write it back, retrying on conflict.
    /// `apply` returns `Ok(false)` when there is nothing to write.
    async fn update<F>(&self, key: &JobKey, apply: F) -> Result<JobRecord, JobError>
    where
        F: Fn(&mut JobRecord) -> Result<bool, RecordError> + Send + Sync,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut record = self.load(key).await?;
            if !apply(&mut record)? {
                return Ok(record);
            }
            match self.store.save(&mut record).await {
                Ok(()) => return Ok(record),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(job = %key, attempt, "Status write conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(JobError::Conflict(key.clone()))
    }

    /// Persist a processed step. A conflicting write is merged when only the
    /// status changed underneath (a pause or resume). If the cursor moved, a
    /// concurrent tick already advanced the job and the write is abandoned.
    /// So is a write whose job was reset and resubmitted in the meantime.
    async fn persist_step(
        &self,
        record: &mut JobRecord,
        cursor: usize,
        result: &StepResult,
    ) -> Result<(), JobError> {
        let key = record.key();
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.store.save(record).await {
                Ok(()) => {
                    metrics::counter!(
                        "bulk_job_ticks_total",
                        "kind" => key.kind.to_string(),
                        "result" => "advanced"
                    )
                    .increment(1);
                    return Ok(());
                }
                Err(StoreError::Conflict(_)) => {}
                Err(e) => {
                    tracing::error!(
                        job = %key,
                        item = %result.item.label(),
                        error = %e,
                        "Item executed but progress was not saved; it may be re-attempted"
                    );
                    return Err(e.into());
                }
            }

            let mut fresh = self.load(&key).await?;
            if fresh.generation != record.generation
                || fresh.processed != cursor
                || fresh.is_terminal()
            {
                tracing::warn!(
                    job = %key,
                    expected = cursor,
                    found = fresh.processed,
                    status = %fresh.status,
                    generation = fresh.generation,
                    "Job was advanced or replaced concurrently"
                );
                metrics::counter!(
                    "bulk_job_ticks_total",
                    "kind" => key.kind.to_string(),
                    "result" => "conflict"
                )
                .increment(1);
                return Err(JobError::Conflict(key));
            }
            tracing::debug!(
                job = %key,
                attempt,
                status = %fresh.status,
                "Merging step into updated record"
            );
            fresh.record_result(result.clone())?;
            *record = fresh;
        }
        Err(JobError::Conflict(key))
    }
}

#[async_trait]
impl JobControl for TickExecutor {
    async fn submit(
        &self,
        key: JobKey,
        items: Vec<JobItem>,
        options: JobOptions,
    ) -> Result<JobStatusView, JobError> {
        let mut record = JobRecord::new(&key, items, options, JobStatus::Queued)?;

        let replaces = match self.store.load(&key).await? {
            Some(existing) if !existing.is_terminal() => {
                return Err(JobError::AlreadyActive {
                    key,
                    status: existing.status,
                });
            }
            Some(existing) => existing.revision(),
            None => Revision::ABSENT,
        };
        // Versions restart after a reset; the generation tells submissions apart.
        record.generation = self.store.next_generation().await?;
        // A command left over from the previous job must not hit the new one.
        if let Some(stale) = self.store.read_control(&key).await? {
            self.store.clear_control(&key, stale).await?;
        }

        self.store
            .save_over(&mut record, replaces)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => JobError::Conflict(key.clone()),
                other => other.into(),
            })?;

        metrics::counter!(
            "bulk_jobs_submitted_total",
            "mode" => "durable",
            "kind" => key.kind.to_string()
        )
        .increment(1);
        tracing::info!(job = %key, total = record.total(), "Durable job submitted");
        Ok(JobStatusView::from_record(&record))
    }

    async fn status(&self, key: &JobKey) -> JobStatusView {
        match self.store.load(key).await {
            Ok(Some(record)) => JobStatusView::from_record(&record),
            Ok(None) => JobStatusView::idle(),
            Err(e) => {
                tracing::warn!(job = %key, error = %e, "Status read failed");
                JobStatusView::unavailable(e.to_string())
            }
        }
    }

    async fn control(&self, key: &JobKey, action: ControlAction) -> Result<JobStatus, JobError> {
        let record = match action {
            ControlAction::Pause => self.update(key, |r| r.transition(JobStatus::Paused)).await?,
            ControlAction::Resume => {
                self.update(key, |r| {
                    if r.status == JobStatus::Paused || r.is_terminal() {
                        r.transition(JobStatus::Running)
                    } else {
                        Ok(false)
                    }
                })
                .await?
            }
            ControlAction::Cancel => {
                let record = self.load(key).await?;
                if !record.is_terminal() {
                    self.store.write_control(key, ControlAction::Cancel).await?;
                    tracing::info!(
                        job = %key,
                        processed = record.processed,
                        "Durable job cancel requested"
                    );
                }
                return Ok(record.status);
            }
        };
        tracing::info!(
            job = %key,
            action = %action,
            status = %record.status,
            "Durable job control applied"
        );
        Ok(record.status)
    }

    async fn reset(&self, key: &JobKey) -> Result<(), JobError> {
        if self.store.delete(key).await? {
            tracing::info!(job = %key, "Durable job reset");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobKind, Outcome, StepOutcome};
    use crate::services::step::StepContext;
    use crate::services::store::MemoryJobStore;
    use std::sync::Mutex;
    use tokio::sync::{Notify, Semaphore};

    /// Records every item it is asked to process.
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StepExecutor for RecordingExecutor {
        async fn execute(&self, item: &JobItem, _ctx: &StepContext<'_>) -> StepOutcome {
            let label = item.label();
            self.seen.lock().unwrap().push(label.clone());
            if label.starts_with("fail") {
                StepOutcome::failed("rejected")
            } else {
                StepOutcome::success("ok")
            }
        }
    }

    /// Holds every item until the test hands out a permit.
    struct GatedExecutor {
        entered: Notify,
        gate: Semaphore,
    }

    impl Default for GatedExecutor {
        fn default() -> Self {
            Self {
                entered: Notify::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl StepExecutor for GatedExecutor {
        async fn execute(&self, _item: &JobItem, _ctx: &StepContext<'_>) -> StepOutcome {
            self.entered.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            StepOutcome::success("ok")
        }
    }

    struct Fixture {
        store: Arc<MemoryJobStore>,
        executor: Arc<RecordingExecutor>,
        ticker: TickExecutor,
        key: JobKey,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let executor = Arc::new(RecordingExecutor::default());
        let ticker = TickExecutor::new(store.clone(), executor.clone());
        Fixture {
            store,
            executor,
            ticker,
            key: JobKey::new(JobKind::Registration, "site-1").unwrap(),
        }
    }

    fn emails(list: &[&str]) -> Vec<JobItem> {
        list.iter().map(|e| JobItem::email(*e)).collect()
    }

    impl Fixture {
        async fn submit(&self, list: &[&str]) {
            self.ticker
                .submit(self.key.clone(), emails(list), JobOptions::default())
                .await
                .unwrap();
        }

        async fn stored(&self) -> JobRecord {
            self.store.load(&self.key).await.unwrap().unwrap()
        }

        fn seen(&self) -> Vec<String> {
            self.executor.seen.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_two_items_then_already_complete() {
        let fx = fixture();
        fx.submit(&["a@x.com", "b@x.com"]).await;
        assert_eq!(fx.stored().await.status, JobStatus::Queued);

        let first = fx.ticker.tick(&fx.key).await.unwrap();
        assert!(matches!(first.outcome, TickOutcome::Advanced(_)));
        assert_eq!((first.processed, first.status), (1, JobStatus::Running));

        let second = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!((second.processed, second.status), (2, JobStatus::Complete));
        assert!(second.to_string().ends_with("job complete"));

        let third = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!(third.outcome, TickOutcome::AlreadyComplete);
        assert_eq!(third.to_string(), "Already complete (2/2)");
        assert_eq!(fx.seen(), vec!["a@x.com", "b@x.com"]);
    }

    #[tokio::test]
    async fn test_ticking_complete_job_changes_nothing() {
        let fx = fixture();
        fx.submit(&["a@x.com"]).await;
        fx.ticker.tick(&fx.key).await.unwrap();
        let done = fx.stored().await;

        for _ in 0..3 {
            let report = fx.ticker.tick(&fx.key).await.unwrap();
            assert_eq!(report.outcome, TickOutcome::AlreadyComplete);
        }
        assert_eq!(fx.stored().await, done);
        assert_eq!(fx.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_item_still_advances() {
        let fx = fixture();
        fx.submit(&["fail@x.com", "b@x.com"]).await;

        let report = fx.ticker.tick(&fx.key).await.unwrap();
        let TickOutcome::Advanced(result) = report.outcome else {
            panic!("expected an advanced tick");
        };
        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(report.processed, 1);
        let stored = fx.stored().await;
        assert_eq!(stored.results.len(), stored.processed);
    }

    #[tokio::test]
    async fn test_pause_blocks_ticks_until_resume() {
        let fx = fixture();
        fx.submit(&["a@x.com", "b@x.com", "c@x.com"]).await;
        fx.ticker.tick(&fx.key).await.unwrap();

        let status = fx.ticker.control(&fx.key, ControlAction::Pause).await.unwrap();
        assert_eq!(status, JobStatus::Paused);

        let report = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Paused);
        assert_eq!(report.processed, 1);
        assert_eq!(fx.stored().await.processed, 1);

        fx.ticker.control(&fx.key, ControlAction::Resume).await.unwrap();
        let report = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!((report.processed, report.status), (2, JobStatus::Running));
    }

    #[tokio::test]
    async fn test_cancel_beats_pause() {
        let fx = fixture();
        fx.submit(&["a@x.com", "b@x.com"]).await;
        fx.ticker.control(&fx.key, ControlAction::Pause).await.unwrap();

        let acknowledged = fx.ticker.control(&fx.key, ControlAction::Cancel).await.unwrap();
        assert_eq!(acknowledged, JobStatus::Paused);

        let report = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Canceled);
        assert_eq!(report.status, JobStatus::Canceled);
        assert_eq!(report.processed, 0);
        assert!(fx.store.read_control(&fx.key).await.unwrap().is_none());

        let again = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!(again.outcome, TickOutcome::Finished);
        assert!(fx.seen().is_empty());

        let status = fx.ticker.status(&fx.key).await;
        assert_eq!(status.status, JobStatus::Canceled);
        assert!(status.processed < status.total);
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_pause_and_resume() {
        let fx = fixture();
        fx.submit(&["a@x.com"]).await;
        fx.ticker.tick(&fx.key).await.unwrap();

        for action in [ControlAction::Pause, ControlAction::Resume] {
            let err = fx.ticker.control(&fx.key, action).await.unwrap_err();
            assert_eq!(err.code(), "invalid_transition");
        }
        // Cancelling a finished job is a harmless no-op.
        let status = fx.ticker.control(&fx.key, ControlAction::Cancel).await.unwrap();
        assert_eq!(status, JobStatus::Complete);
        assert!(fx.store.read_control(&fx.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let fx = fixture();
        assert_eq!(fx.ticker.tick(&fx.key).await.unwrap_err().code(), "job_not_found");
        assert_eq!(
            fx.ticker
                .control(&fx.key, ControlAction::Cancel)
                .await
                .unwrap_err()
                .code(),
            "job_not_found"
        );
        assert_eq!(fx.ticker.status(&fx.key).await, JobStatusView::idle());
        fx.ticker.reset(&fx.key).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_rejects_active_and_supersedes_terminal() {
        let fx = fixture();
        fx.submit(&["a@x.com"]).await;
        let err = fx
            .ticker
            .submit(fx.key.clone(), emails(&["b@x.com"]), JobOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "job_already_active");

        fx.ticker.tick(&fx.key).await.unwrap();
        fx.submit(&["b@x.com", "c@x.com"]).await;
        let stored = fx.stored().await;
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.processed, 0);
        assert_eq!(stored.total(), 2);
    }

    #[tokio::test]
    async fn test_reset_returns_key_to_idle() {
        let fx = fixture();
        fx.submit(&["a@x.com"]).await;
        fx.ticker.control(&fx.key, ControlAction::Cancel).await.unwrap();

        fx.ticker.reset(&fx.key).await.unwrap();
        assert_eq!(fx.ticker.status(&fx.key).await.status, JobStatus::Idle);
        assert!(fx.store.read_control(&fx.key).await.unwrap().is_none());

        // A fresh job starts clean.
        fx.submit(&["b@x.com"]).await;
        let report = fx.ticker.tick(&fx.key).await.unwrap();
        assert_eq!(report.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_delay_spaces_out_ticks() {
        let fx = fixture();
        fx.ticker
            .submit(
                fx.key.clone(),
                emails(&["a@x.com", "b@x.com"]),
                JobOptions {
                    delay_seconds: 60,
                    target_url: None,
                },
            )
            .await
            .unwrap();

        fx.ticker.tick(&fx.key).await.unwrap();
        let report = fx.ticker.tick(&fx.key).await.unwrap();
        let TickOutcome::Waiting(remaining) = report.outcome else {
            panic!("expected the second tick to wait");
        };
        assert!(remaining > Duration::from_secs(50));
        assert_eq!(report.processed, 1);
        assert_eq!(fx.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_status_only_write_is_merged() {
        let fx = fixture();
        fx.submit(&["a@x.com", "b@x.com", "c@x.com"]).await;

        // Simulate a pause landing while a tick is between its load and its save.
        let mut in_flight = fx.stored().await;
        fx.ticker.control(&fx.key, ControlAction::Pause).await.unwrap();

        let cursor = in_flight.processed;
        let result = step::advance(&*fx.executor, &mut in_flight)
            .await
            .unwrap()
            .unwrap();
        fx.ticker
            .persist_step(&mut in_flight, cursor, &result)
            .await
            .unwrap();

        let stored = fx.stored().await;
        assert_eq!(stored.processed, 1);
        assert_eq!(stored.results.len(), 1);
        assert_eq!(stored.status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_double_tick_is_a_conflict() {
        let fx = fixture();
        fx.submit(&["a@x.com", "b@x.com"]).await;

        let mut stale = fx.stored().await;
        fx.ticker.tick(&fx.key).await.unwrap();

        let cursor = stale.processed;
        let result = step::advance(&*fx.executor, &mut stale).await.unwrap().unwrap();
        let err = fx
            .ticker
            .persist_step(&mut stale, cursor, &result)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "write_conflict");

        let stored = fx.stored().await;
        assert_eq!(stored.processed, 1);
        assert_eq!(stored.results.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_across_reset_leaves_resubmitted_job_alone() {
        let store = Arc::new(MemoryJobStore::new());
        let executor = Arc::new(GatedExecutor::default());
        let ticker = Arc::new(TickExecutor::new(store.clone(), executor.clone()));
        let key = JobKey::new(JobKind::Registration, "site-1").unwrap();
        ticker
            .submit(key.clone(), emails(&["old@x.com"]), JobOptions::default())
            .await
            .unwrap();

        let in_flight = tokio::spawn({
            let ticker = ticker.clone();
            let key = key.clone();
            async move { ticker.tick(&key).await }
        });
        executor.entered.notified().await;

        ticker.reset(&key).await.unwrap();
        ticker
            .submit(
                key.clone(),
                emails(&["new1@x.com", "new2@x.com"]),
                JobOptions::default(),
            )
            .await
            .unwrap();
        executor.gate.add_permits(1);

        let err = in_flight.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "write_conflict");

        let stored = store.load(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.total(), 2);
        assert_eq!(stored.processed, 0);
        assert!(stored.results.is_empty());
    }

    #[tokio::test]
    async fn test_tick_all_skips_finished_jobs() {
        let fx = fixture();
        fx.submit(&["a@x.com", "b@x.com"]).await;
        let other = JobKey::new(JobKind::Registration, "site-2").unwrap();
        fx.ticker
            .submit(other.clone(), emails(&["z@x.com"]), JobOptions::default())
            .await
            .unwrap();
        fx.ticker.tick(&other).await.unwrap();

        assert_eq!(fx.ticker.tick_all().await.unwrap(), 1);
        assert_eq!(fx.stored().await.processed, 1);
        assert_eq!(fx.seen(), vec!["z@x.com", "a@x.com"]);
    }
}
