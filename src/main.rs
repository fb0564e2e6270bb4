use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bulk_jobs::app_state::AppState;
use bulk_jobs::config::AppConfig;
use bulk_jobs::routes;
use bulk_jobs::services::{step::HttpStepExecutor, store};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing bulk-jobs server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Register application metrics
    metrics::describe_counter!("bulk_jobs_submitted_total", "Bulk jobs accepted, by mode and kind");
    metrics::describe_counter!("bulk_jobs_finished_total", "Live jobs that ended, by final status");
    metrics::describe_gauge!("bulk_jobs_active", "Live jobs currently running or paused");
    metrics::describe_counter!("bulk_job_items_total", "Items processed, by kind and outcome");
    metrics::describe_histogram!("bulk_job_step_seconds", "Time spent processing a single item");
    metrics::describe_counter!(
        "bulk_job_ticks_total",
        "Durable ticks that processed an item or conflicted"
    );

    tracing::info!(redis = config.redis_url.is_some(), "Connecting to job store");
    let store = store::connect(config.redis_url.as_deref())
        .await
        .expect("Failed to connect to job store");

    let executor =
        HttpStepExecutor::new(&config.api_base_url, &config.api_key, config.step_timeout())
            .expect("Failed to initialize downstream API client");

    let state = AppState::new(store, Arc::new(executor), config.default_delay_seconds)
        .with_prometheus(prometheus_handle);
    let worker = state.worker.clone();

    let app = routes::router(state);

    tracing::info!("Starting bulk-jobs on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // In-process jobs do not survive the process; stop them at an item boundary.
    worker.shutdown().await;
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
