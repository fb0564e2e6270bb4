use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Longest tenant identifier accepted as part of a job key.
pub const MAX_TENANT_LEN: usize = 128;

/// The kind of bulk operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Registration,
    Deletion,
    Webhook,
}

/// Lifecycle status of a bulk job.
///
/// `Idle` is never persisted; it is what a status query reports for a key
/// with no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Queued,
    Running,
    Paused,
    Canceled,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Complete | Self::Failed)
    }

    /// Whether `self -> next` is a legal edge of the job state machine.
    ///
    /// Only `Running <-> Paused` is reversible; terminal states have no exits.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Idle, Queued | Running) => true,
            (Queued, Running | Paused | Canceled | Complete | Failed) => true,
            (Running, Paused | Canceled | Complete | Failed) => true,
            (Paused, Running | Canceled | Complete | Failed) => true,
            _ => false,
        }
    }
}

/// Identifies one bulk job: its kind plus the tenant (site) it runs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub tenant: String,
}

impl JobKey {
    pub fn new(kind: JobKind, tenant: impl Into<String>) -> Result<Self, RecordError> {
        let tenant = tenant.into();
        if tenant.is_empty() || tenant.len() > MAX_TENANT_LEN {
            return Err(RecordError::Invalid(format!(
                "tenant must be 1-{} characters",
                MAX_TENANT_LEN
            )));
        }
        if !tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RecordError::Invalid(
                "tenant may only contain ASCII letters, digits, '-' and '_'".to_string(),
            ));
        }
        Ok(Self { kind, tenant })
    }

    /// Store key holding the job record, e.g. `deletion_job_site-42`.
    pub fn record_key(&self) -> String {
        format!("{}_job_{}", self.kind, self.tenant)
    }

    /// Sibling store key holding out-of-band control commands.
    pub fn control_key(&self) -> String {
        format!("{}_control_{}", self.kind, self.tenant)
    }

    /// Inverse of [`JobKey::record_key`].
    pub fn from_record_key(raw: &str) -> Option<Self> {
        let (kind, tenant) = raw.split_once("_job_")?;
        let kind = kind.parse().ok()?;
        Self::new(kind, tenant).ok()
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.tenant)
    }
}

/// One unit of work within a bulk job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobItem {
    /// Register a member by email address.
    Email { email: String },
    /// Delete a member and, when known, its linked contact.
    Member {
        member_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contact_id: Option<String>,
    },
    /// Deliver one webhook payload.
    Webhook { payload: serde_json::Value },
}

impl JobItem {
    pub fn email(email: impl Into<String>) -> Self {
        Self::Email {
            email: email.into(),
        }
    }

    pub fn member(member_id: impl Into<String>, contact_id: Option<String>) -> Self {
        Self::Member {
            member_id: member_id.into(),
            contact_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::Email { .. } => JobKind::Registration,
            Self::Member { .. } => JobKind::Deletion,
            Self::Webhook { .. } => JobKind::Webhook,
        }
    }

    /// Short human-readable label used in logs.
    pub fn label(&self) -> String {
        match self {
            Self::Email { email } => email.clone(),
            Self::Member {
                member_id,
                contact_id: Some(contact_id),
            } => format!("{member_id}+{contact_id}"),
            Self::Member { member_id, .. } => member_id.clone(),
            Self::Webhook { .. } => "webhook payload".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

/// What a step executor reports for a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub outcome: Outcome,
    pub detail: String,
}

impl StepOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Success,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// One entry of a job's append-only result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub item: JobItem,
    pub outcome: Outcome,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Execution options supplied at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Minimum spacing between consecutive downstream calls.
    pub delay_seconds: u64,
    /// Destination for webhook jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

/// The point in a record's history a conditional write expects to replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revision {
    pub version: u64,
    pub generation: u64,
}

impl Revision {
    /// Nothing stored under the key.
    pub const ABSENT: Revision = Revision {
        version: 0,
        generation: 0,
    };
}

/// Persisted state of one bulk job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub kind: JobKind,
    pub tenant: String,
    pub status: JobStatus,
    pub items: Vec<JobItem>,
    /// Cursor: index of the next unprocessed item.
    pub processed: usize,
    pub results: Vec<StepResult>,
    pub delay_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Store version this record was read at; bumped by every conditional write.
    #[serde(default)]
    pub version: u64,
    /// Submission this record belongs to; a reset followed by a new submit
    /// yields a different generation under the same key.
    #[serde(default)]
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_step_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Build a fresh record after checking that the items fit the key's kind.
    pub fn new(
        key: &JobKey,
        items: Vec<JobItem>,
        options: JobOptions,
        status: JobStatus,
    ) -> Result<Self, RecordError> {
        if let Some((index, item)) = items
            .iter()
            .enumerate()
            .find(|(_, item)| item.kind() != key.kind)
        {
            return Err(RecordError::Invalid(format!(
                "item {} is a {} item but the job is {}",
                index,
                item.kind(),
                key.kind
            )));
        }

        match (key.kind, options.target_url.as_deref()) {
            (JobKind::Webhook, None) => {
                return Err(RecordError::Invalid(
                    "webhook jobs require a target_url".to_string(),
                ))
            }
            (JobKind::Webhook, Some(url))
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                return Err(RecordError::Invalid(
                    "target_url must be an http(s) URL".to_string(),
                ))
            }
            (JobKind::Registration | JobKind::Deletion, Some(_)) => {
                return Err(RecordError::Invalid(format!(
                    "target_url is only accepted for webhook jobs, not {}",
                    key.kind
                )))
            }
            _ => {}
        }

        let now = Utc::now();
        Ok(Self {
            kind: key.kind,
            tenant: key.tenant.clone(),
            status,
            items,
            processed: 0,
            results: Vec::new(),
            delay_seconds: options.delay_seconds,
            target_url: options.target_url,
            version: 0,
            generation: 0,
            created_at: now,
            updated_at: now,
            last_step_at: None,
        })
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            kind: self.kind,
            tenant: self.tenant.clone(),
        }
    }

    pub fn revision(&self) -> Revision {
        Revision {
            version: self.version,
            generation: self.generation,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_exhausted(&self) -> bool {
        self.processed >= self.items.len()
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    pub fn options(&self) -> JobOptions {
        JobOptions {
            delay_seconds: self.delay_seconds,
            target_url: self.target_url.clone(),
        }
    }

    /// The item at the cursor, unless the job is terminal or has nothing left.
    pub fn next_item(&self) -> Option<&JobItem> {
        if self.is_terminal() {
            return None;
        }
        self.items.get(self.processed)
    }

    pub fn last_result(&self) -> Option<&StepResult> {
        self.results.last()
    }

    /// Earliest instant the next downstream call may start.
    pub fn next_step_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_step_at?;
        let delay = chrono::Duration::seconds(i64::try_from(self.delay_seconds).ok()?);
        last.checked_add_signed(delay)
    }

    /// Move to `to`. Returns `Ok(false)` when the job already has that status.
    pub fn transition(&mut self, to: JobStatus) -> Result<bool, RecordError> {
        if self.status == to {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(RecordError::Terminal(self.status));
        }
        if !self.status.can_transition_to(to) {
            return Err(RecordError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Append the result for the item at the cursor and advance by one.
    ///
    /// A queued job becomes running; consuming the last item completes the job
    /// even when a pause arrived while the step was in flight.
    pub fn record_result(&mut self, result: StepResult) -> Result<(), RecordError> {
        if self.is_terminal() {
            return Err(RecordError::Terminal(self.status));
        }
        let expected = self.items.get(self.processed).ok_or(RecordError::Exhausted)?;
        if *expected != result.item {
            return Err(RecordError::Invalid(format!(
                "result for {} does not match item {} at the cursor",
                result.item.label(),
                self.processed
            )));
        }

        self.last_step_at = Some(result.at);
        self.results.push(result);
        self.processed += 1;
        self.updated_at = Utc::now();

        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
        }
        if self.is_exhausted() {
            self.status = JobStatus::Complete;
        }

        self.check_invariants()
    }

    pub fn check_invariants(&self) -> Result<(), RecordError> {
        if self.processed > self.items.len() {
            return Err(RecordError::Corrupt(format!(
                "cursor {} is past the {} items",
                self.processed,
                self.items.len()
            )));
        }
        if self.results.len() != self.processed {
            return Err(RecordError::Corrupt(format!(
                "{} results recorded for cursor {}",
                self.results.len(),
                self.processed
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("cannot move job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job is {0} and can no longer change")]
    Terminal(JobStatus),

    #[error("job has no remaining items")]
    Exhausted,

    #[error("invalid job: {0}")]
    Invalid(String),

    #[error("job record is inconsistent: {0}")]
    Corrupt(String),
}
