pub mod events;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Large enough for a maximal batch of webhook payloads.
const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/api/v1/live/jobs", get(jobs::list_live_jobs))
        .route("/api/v1/live/events", get(events::live_events))
        .route(
            "/api/v1/jobs/{mode}/{kind}/{tenant}",
            post(jobs::submit_job)
                .get(jobs::get_job_status)
                .delete(jobs::reset_job),
        )
        .route(
            "/api/v1/jobs/{mode}/{kind}/{tenant}/control",
            post(jobs::control_job),
        )
        .route(
            "/api/v1/jobs/{mode}/{kind}/{tenant}/tick",
            post(jobs::tick_job),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
}
