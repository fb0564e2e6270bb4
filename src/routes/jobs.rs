use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{
    ControlRequest, ControlResponse, JobStatusView, JobSummary, Mode, SubmitRequest,
    SubmitResponse, TickResponse,
};
use crate::models::job::{JobKey, JobKind};
use crate::services::control::JobError;

/// Error returned by job handlers, rendered as `{error, message}`.
#[derive(Debug)]
pub struct ApiError(pub JobError);

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            "job_not_found" => StatusCode::NOT_FOUND,
            "job_already_active" | "write_conflict" | "invalid_transition" => StatusCode::CONFLICT,
            "invalid_job" => StatusCode::UNPROCESSABLE_ENTITY,
            "tick_unsupported" => StatusCode::BAD_REQUEST,
            "store_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, code, "Job request failed");
        }
        json_error(status, code, self.0.to_string())
    }
}

fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

type JobPath = Path<(String, String, String)>;

/// Resolve `{mode}/{kind}/{tenant}` path segments.
fn resolve(Path((mode, kind, tenant)): JobPath) -> Result<(Mode, JobKey), ApiError> {
    let mode: Mode = mode
        .parse()
        .map_err(|_| JobError::Invalid(format!("unknown mode '{mode}'")))?;
    let kind: JobKind = kind
        .parse()
        .map_err(|_| JobError::Invalid(format!("unknown job kind '{kind}'")))?;
    let key = JobKey::new(kind, tenant).map_err(JobError::from)?;
    Ok((mode, key))
}

/// POST /api/v1/jobs/{mode}/{kind}/{tenant} — start a bulk job.
pub async fn submit_job(
    State(state): State<AppState>,
    path: JobPath,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let (mode, key) = resolve(path)?;
    let Json(req) = body.map_err(|e| JobError::Invalid(e.body_text()))?;
    req.validate()
        .map_err(|report| JobError::Invalid(report.to_string()))?;

    let options = req.options(state.default_delay_seconds);
    let total = req.items.len();
    let view = state
        .jobs(mode)
        .submit(key.clone(), req.items, options)
        .await?;

    let message = match mode {
        Mode::Live => format!("Processing {total} items"),
        Mode::Durable => format!("Queued {total} items; tick to advance"),
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            key,
            status: view.status,
            total,
            message,
        }),
    ))
}

/// GET /api/v1/jobs/{mode}/{kind}/{tenant} — progress of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    path: JobPath,
) -> Result<Json<JobStatusView>, ApiError> {
    let (mode, key) = resolve(path)?;
    Ok(Json(state.jobs(mode).status(&key).await))
}

/// POST /api/v1/jobs/{mode}/{kind}/{tenant}/control — pause, resume or cancel.
pub async fn control_job(
    State(state): State<AppState>,
    path: JobPath,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, ApiError> {
    let (mode, key) = resolve(path)?;
    let Json(req) = body.map_err(|e| JobError::Invalid(e.body_text()))?;
    let status = state.jobs(mode).control(&key, req.action).await?;
    Ok(Json(ControlResponse {
        action: req.action,
        status,
    }))
}

/// DELETE /api/v1/jobs/{mode}/{kind}/{tenant} — forget a job.
pub async fn reset_job(
    State(state): State<AppState>,
    path: JobPath,
) -> Result<StatusCode, ApiError> {
    let (mode, key) = resolve(path)?;
    state.jobs(mode).reset(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/jobs/{mode}/{kind}/{tenant}/tick — advance a durable job by one item.
pub async fn tick_job(
    State(state): State<AppState>,
    path: JobPath,
) -> Result<Json<TickResponse>, ApiError> {
    let (mode, key) = resolve(path)?;
    if mode != Mode::Durable {
        return Err(JobError::TickUnsupported.into());
    }
    let report = state.ticker.tick(&key).await?;
    Ok(Json(report.into()))
}

/// GET /api/v1/live/jobs — every job the in-process worker knows about.
pub async fn list_live_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    let records = state.worker.snapshot().await;
    Json(records.iter().map(JobSummary::from).collect())
}
