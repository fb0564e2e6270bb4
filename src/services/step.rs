use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode, Url};

use crate::models::job::{
    JobItem, JobKey, JobOptions, JobRecord, RecordError, StepOutcome, StepResult,
};

/// Longest slice of a downstream error body kept in a result detail.
const MAX_DETAIL_BODY: usize = 200;

/// What a step executor knows about the job an item belongs to.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub key: &'a JobKey,
    /// Spacing between the downstream calls made for a single item.
    pub delay: Duration,
    pub target_url: Option<&'a str>,
}

/// Performs the side effects for exactly one work item.
///
/// Implementations never fail: every error is folded into a
/// [`StepOutcome::failed`] so one bad item cannot abort the batch.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, item: &JobItem, ctx: &StepContext<'_>) -> StepOutcome;
}

/// Step executor calling the member/contact API and webhook targets over HTTP.
pub struct HttpStepExecutor {
    http: Client,
    api_base: Url,
    api_key: String,
}

impl HttpStepExecutor {
    /// `timeout` bounds every request so a hung downstream call becomes a failed item.
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, StepError> {
        let api_base = Url::parse(api_base)
            .map_err(|e| StepError::InvalidBaseUrl(format!("{api_base}: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(StepError::InvalidBaseUrl(api_base.to_string()));
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_base,
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder, key: &JobKey) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("x-tenant-id", &key.tenant)
    }

    async fn register(&self, email: &str, ctx: &StepContext<'_>) -> StepOutcome {
        let request = self
            .authorized(self.http.post(self.endpoint(&["members"])), ctx.key)
            .json(&serde_json::json!({ "email": email }));

        match send(request).await {
            Ok((status, _)) if status.is_success() => StepOutcome::success("registered"),
            Ok((StatusCode::CONFLICT, _)) => StepOutcome::success("already registered"),
            Ok((status, body)) => {
                StepOutcome::failed(format!("registration rejected with {status}{body}"))
            }
            Err(detail) => StepOutcome::failed(format!("registration failed: {detail}")),
        }
    }

    /// DELETE treating 404 as already gone.
    async fn delete(&self, url: Url, key: &JobKey) -> Result<&'static str, String> {
        match send(self.authorized(self.http.delete(url), key)).await {
            Ok((status, _)) if status.is_success() => Ok("deleted"),
            Ok((StatusCode::NOT_FOUND, _)) => Ok("already absent"),
            Ok((status, body)) => Err(format!("rejected with {status}{body}")),
            Err(detail) => Err(detail),
        }
    }

    async fn delete_member(
        &self,
        member_id: &str,
        contact_id: Option<&str>,
        ctx: &StepContext<'_>,
    ) -> StepOutcome {
        let member = match self
            .delete(self.endpoint(&["members", member_id]), ctx.key)
            .await
        {
            Ok(detail) => detail,
            Err(detail) => return StepOutcome::failed(format!("member {detail}")),
        };

        let Some(contact_id) = contact_id else {
            return StepOutcome::success(format!("member {member}"));
        };

        if !ctx.delay.is_zero() {
            tokio::time::sleep(ctx.delay).await;
        }

        match self
            .delete(self.endpoint(&["contacts", contact_id]), ctx.key)
            .await
        {
            Ok(contact) => StepOutcome::success(format!("member {member}, contact {contact}")),
            Err(detail) => {
                StepOutcome::failed(format!("member {member}, but contact {detail}"))
            }
        }
    }

    async fn deliver_webhook(
        &self,
        payload: &serde_json::Value,
        ctx: &StepContext<'_>,
    ) -> StepOutcome {
        let Some(target) = ctx.target_url else {
            return StepOutcome::failed("webhook job has no target_url");
        };

        let request = self
            .http
            .post(target)
            .header("x-tenant-id", &ctx.key.tenant)
            .json(payload);

        match send(request).await {
            Ok((status, _)) if status.is_success() => {
                StepOutcome::success(format!("delivered ({status})"))
            }
            Ok((status, body)) => {
                StepOutcome::failed(format!("delivery rejected with {status}{body}"))
            }
            Err(detail) => StepOutcome::failed(format!("delivery failed: {detail}")),
        }
    }
}

#[async_trait]
impl StepExecutor for HttpStepExecutor {
    async fn execute(&self, item: &JobItem, ctx: &StepContext<'_>) -> StepOutcome {
        match item {
            JobItem::Email { email } => self.register(email, ctx).await,
            JobItem::Member {
                member_id,
                contact_id,
            } => self.delete_member(member_id, contact_id.as_deref(), ctx).await,
            JobItem::Webhook { payload } => self.deliver_webhook(payload, ctx).await,
        }
    }
}

/// Send a request and return the status plus a formatted error-body suffix.
async fn send(request: RequestBuilder) -> Result<(StatusCode, String), String> {
    let response = request.send().await.map_err(describe)?;
    let status = response.status();
    if status.is_success() {
        return Ok((status, String::new()));
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        Ok((status, String::new()))
    } else {
        let snippet: String = body.chars().take(MAX_DETAIL_BODY).collect();
        Ok((status, format!(": {snippet}")))
    }
}

fn describe(err: reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("could not connect: {err}")
    } else {
        err.to_string()
    }
}

/// Run one item through `executor` and turn the outcome into a result entry.
///
/// This is the per-item primitive shared by the worker loop and the tick
/// executor; neither model touches the downstream API any other way.
pub async fn run_step(
    executor: &dyn StepExecutor,
    key: &JobKey,
    item: &JobItem,
    options: &JobOptions,
) -> StepResult {
    let ctx = StepContext {
        key,
        delay: Duration::from_secs(options.delay_seconds),
        target_url: options.target_url.as_deref(),
    };

    let start = Instant::now();
    let outcome = executor.execute(item, &ctx).await;
    let elapsed = start.elapsed();

    metrics::counter!(
        "bulk_job_items_total",
        "kind" => key.kind.to_string(),
        "outcome" => outcome.outcome.to_string()
    )
    .increment(1);
    metrics::histogram!("bulk_job_step_seconds", "kind" => key.kind.to_string())
        .record(elapsed.as_secs_f64());

    if outcome.is_success() {
        tracing::info!(
            job = %key,
            item = %item.label(),
            detail = %outcome.detail,
            duration_ms = elapsed.as_millis() as u64,
            "Item processed"
        );
    } else {
        tracing::warn!(
            job = %key,
            item = %item.label(),
            detail = %outcome.detail,
            duration_ms = elapsed.as_millis() as u64,
            "Item failed"
        );
    }

    StepResult {
        item: item.clone(),
        outcome: outcome.outcome,
        detail: outcome.detail,
        at: Utc::now(),
    }
}

/// Process the item at the cursor of `record` and record its result.
///
/// Returns `Ok(None)` when there is nothing to process.
pub async fn advance(
    executor: &dyn StepExecutor,
    record: &mut JobRecord,
) -> Result<Option<StepResult>, RecordError> {
    let Some(item) = record.next_item().cloned() else {
        return Ok(None);
    };
    let result = run_step(executor, &record.key(), &item, &record.options()).await;
    record.record_result(result.clone())?;
    Ok(Some(result))
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
}
