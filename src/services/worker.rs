//! In-process sequential worker.
//!
//! Each submitted job runs as its own tokio task that walks the items front to
//! back. Control commands reach the task through a cancellation token and a
//! pause gate; progress leaves it through a broadcast channel so any number of
//! observers can follow along.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::api::{ControlAction, JobStatusView};
use crate::models::event::{JobUpdate, WorkerEvent};
use crate::models::job::{JobItem, JobKey, JobOptions, JobRecord, JobStatus};
use crate::services::control::{JobControl, JobError};
use crate::services::step::{self, StepExecutor};

/// Events buffered per subscriber before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

struct WorkerJob {
    record: Arc<Mutex<JobRecord>>,
    /// `true` while paused.
    gate: watch::Sender<bool>,
    cancel: CancellationToken,
    /// Cancelled once the loop has emitted its last event and let go of the executor.
    finished: CancellationToken,
    /// Reset but still winding down; invisible to status and control.
    retired: bool,
    task: JoinHandle<()>,
}

/// Registry of in-process jobs, owned by whichever process hosts it.
pub struct JobWorker {
    jobs: RwLock<HashMap<JobKey, WorkerJob>>,
    executor: Arc<dyn StepExecutor>,
    events: broadcast::Sender<WorkerEvent>,
    shutdown: CancellationToken,
}

impl JobWorker {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            executor,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Receive every event from every job. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Current state of every job this worker knows about.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        let mut records = Vec::with_capacity(jobs.len());
        for job in jobs.values().filter(|job| !job.retired) {
            records.push(job.record.lock().await.clone());
        }
        records
    }

    /// Number of jobs that have not reached a terminal status.
    pub async fn active_count(&self) -> usize {
        let jobs = self.jobs.read().await;
        let mut active = 0;
        for job in jobs.values().filter(|job| !job.retired) {
            if !job.record.lock().await.is_terminal() {
                active += 1;
            }
        }
        active
    }

    /// Cancel every loop and wait for them to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut jobs = self.jobs.write().await;
            jobs.drain().map(|(_, job)| job.task).collect()
        };
        tracing::info!(jobs = tasks.len(), "Stopping in-process jobs");
        for joined in futures::future::join_all(tasks).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task ended abnormally");
            }
        }
    }

    fn publish(&self, key: &JobKey, update: JobUpdate) {
        let _ = self.events.send(WorkerEvent::new(key, update));
    }
}

#[async_trait]
impl JobControl for JobWorker {
    async fn submit(
        &self,
        key: JobKey,
        items: Vec<JobItem>,
        options: JobOptions,
    ) -> Result<JobStatusView, JobError> {
        let mut jobs = loop {
            let jobs = self.jobs.write().await;
            let winding_down = match jobs.get(&key) {
                Some(existing) if !existing.finished.is_cancelled() => {
                    let status = existing.record.lock().await.status;
                    if existing.retired || !status.is_terminal() {
                        return Err(JobError::AlreadyActive { key, status });
                    }
                    existing.finished.clone()
                }
                _ => break jobs,
            };
            // Terminal but the previous loop has not emitted its final event yet.
            drop(jobs);
            winding_down.cancelled().await;
        };

        let record = JobRecord::new(&key, items, options, JobStatus::Running)?;
        let view = JobStatusView::from_record(&record);
        let record = Arc::new(Mutex::new(record));
        let (gate, gate_rx) = watch::channel(false);
        let cancel = self.shutdown.child_token();
        let finished = CancellationToken::new();

        let run = JobRun {
            key: key.clone(),
            record: record.clone(),
            gate: gate_rx,
            cancel: cancel.clone(),
            finished: finished.clone(),
            executor: self.executor.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(run.drive());

        metrics::counter!(
            "bulk_jobs_submitted_total",
            "mode" => "live",
            "kind" => key.kind.to_string()
        )
        .increment(1);
        tracing::info!(job = %key, total = view.total, "Live job submitted");

        jobs.insert(
            key,
            WorkerJob {
                record,
                gate,
                cancel,
                finished,
                retired: false,
                task,
            },
        );
        Ok(view)
    }

    async fn status(&self, key: &JobKey) -> JobStatusView {
        let jobs = self.jobs.read().await;
        match jobs.get(key) {
            Some(job) if !job.retired => JobStatusView::from_record(&*job.record.lock().await),
            _ => JobStatusView::idle(),
        }
    }

    async fn control(&self, key: &JobKey, action: ControlAction) -> Result<JobStatus, JobError> {
        let jobs = self.jobs.read().await;
        let job = jobs
            .get(key)
            .filter(|job| !job.retired)
            .ok_or_else(|| JobError::NotFound(key.clone()))?;
        let mut record = job.record.lock().await;

        match action {
            ControlAction::Pause => {
                if record.transition(JobStatus::Paused)? {
                    job.gate.send_replace(true);
                    self.publish(key, JobUpdate::Paused);
                    tracing::info!(job = %key, processed = record.processed, "Live job paused");
                }
            }
            ControlAction::Resume => {
                if record.status == JobStatus::Paused {
                    record.transition(JobStatus::Running)?;
                    job.gate.send_replace(false);
                    self.publish(key, JobUpdate::Resumed);
                    tracing::info!(job = %key, processed = record.processed, "Live job resumed");
                } else if record.is_terminal() {
                    record.transition(JobStatus::Running)?;
                }
            }
            ControlAction::Cancel => {
                if !record.is_terminal() {
                    job.cancel.cancel();
                    tracing::info!(
                        job = %key,
                        processed = record.processed,
                        "Live job cancel requested"
                    );
                }
            }
        }
        Ok(record.status)
    }

    /// Cancel the job and forget it once its loop has wound down, so an item
    /// already in flight never overlaps with a resubmitted job under the same key.
    async fn reset(&self, key: &JobKey) -> Result<(), JobError> {
        let (record, finished) = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(key) else {
                return Ok(());
            };
            job.retired = true;
            job.cancel.cancel();
            (job.record.clone(), job.finished.clone())
        };
        finished.cancelled().await;

        let mut jobs = self.jobs.write().await;
        if jobs
            .get(key)
            .is_some_and(|job| Arc::ptr_eq(&job.record, &record))
        {
            jobs.remove(key);
        }
        tracing::info!(job = %key, "Live job reset");
        Ok(())
    }
}

/// State owned by one job's loop.
struct JobRun {
    key: JobKey,
    record: Arc<Mutex<JobRecord>>,
    gate: watch::Receiver<bool>,
    cancel: CancellationToken,
    finished: CancellationToken,
    executor: Arc<dyn StepExecutor>,
    events: broadcast::Sender<WorkerEvent>,
}

impl JobRun {
    async fn drive(mut self) {
        let _finished = self.finished.clone().drop_guard();
        let (total, delay_seconds) = {
            let record = self.record.lock().await;
            (record.total(), record.delay_seconds)
        };
        metrics::gauge!("bulk_jobs_active", "mode" => "live").increment(1.0);
        self.emit(JobUpdate::Started { total });

        let mut first = true;
        loop {
            if !self.wait_while_paused().await || self.cancel.is_cancelled() {
                break;
            }

            if !first && delay_seconds > 0 && !self.countdown(delay_seconds).await {
                // Interrupted by a pause or cancel; re-evaluate from the top.
                continue;
            }

            let (item, options) = {
                let record = self.record.lock().await;
                if record.status == JobStatus::Paused {
                    continue;
                }
                match record.next_item() {
                    Some(item) => (item.clone(), record.options()),
                    None => break,
                }
            };

            let result = step::run_step(&*self.executor, &self.key, &item, &options).await;
            first = false;

            let recorded = {
                let mut record = self.record.lock().await;
                record
                    .record_result(result.clone())
                    .map(|()| (record.processed, record.total(), record.is_terminal()))
            };
            match recorded {
                Ok((processed, total, terminal)) => {
                    self.emit(JobUpdate::Progress {
                        processed,
                        total,
                        result,
                    });
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        job = %self.key,
                        error = %e,
                        "Could not record step result"
                    );
                    let mut record = self.record.lock().await;
                    if let Err(e) = record.transition(JobStatus::Failed) {
                        tracing::error!(job = %self.key, error = %e, "Could not mark job failed");
                    }
                    break;
                }
            }
        }

        self.finish().await;
        metrics::gauge!("bulk_jobs_active", "mode" => "live").decrement(1.0);
    }

    /// Block while the gate is closed. Returns `false` if the job should stop.
    async fn wait_while_paused(&mut self) -> bool {
        loop {
            let paused = *self.gate.borrow_and_update();
            if !paused {
                return true;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                changed = self.gate.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait out the inter-item delay, one tick event per second.
    /// Returns `false` when a pause or cancel interrupted the wait.
    async fn countdown(&mut self, delay_seconds: u64) -> bool {
        for remaining in (1..=delay_seconds).rev() {
            self.emit(JobUpdate::CountdownTick {
                remaining_seconds: remaining,
            });
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = self.gate.changed() => return false,
                _ = tokio::time::sleep(COUNTDOWN_STEP) => {}
            }
        }
        true
    }

    async fn finish(&self) {
        let (status, processed, total) = {
            let mut record = self.record.lock().await;
            if !record.is_terminal() {
                let target = if record.is_exhausted() {
                    JobStatus::Complete
                } else if self.cancel.is_cancelled() {
                    JobStatus::Canceled
                } else {
                    JobStatus::Failed
                };
                if let Err(e) = record.transition(target) {
                    tracing::error!(job = %self.key, error = %e, "Could not finalize job");
                }
            }
            (record.status, record.processed, record.total())
        };

        metrics::counter!(
            "bulk_jobs_finished_total",
            "mode" => "live",
            "status" => status.to_string()
        )
        .increment(1);
        tracing::info!(job = %self.key, status = %status, processed, total, "Live job finished");
        self.emit(JobUpdate::Done {
            status,
            processed,
            total,
        });
    }

    fn emit(&self, update: JobUpdate) {
        let _ = self.events.send(WorkerEvent::new(&self.key, update));
    }
}
