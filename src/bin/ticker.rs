use bulk_jobs::{
    config::AppConfig,
    services::{step::HttpStepExecutor, store, ticker::TickExecutor},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting durable job ticker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    if config.redis_url.is_none() {
        tracing::warn!("REDIS_URL not set; the ticker will only see jobs it creates itself");
    }

    let store = store::connect(config.redis_url.as_deref())
        .await
        .expect("Failed to connect to job store");

    let executor =
        HttpStepExecutor::new(&config.api_base_url, &config.api_key, config.step_timeout())
            .expect("Failed to initialize downstream API client");

    let ticker = TickExecutor::new(store, Arc::new(executor));
    let interval = config.tick_interval();

    tracing::info!(interval_ms = config.tick_interval_ms, "Ticker ready, starting sweep loop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, stopping ticker");
                break;
            }
            _ = sweep(&ticker, interval) => {}
        }
    }
}

/// Tick every unfinished job once, then wait out the interval.
async fn sweep(ticker: &TickExecutor, interval: Duration) {
    match ticker.tick_all().await {
        Ok(0) => tracing::trace!("No durable jobs to advance"),
        Ok(ticked) => tracing::debug!(ticked, "Sweep complete"),
        Err(e) => tracing::error!(error = %e, "Sweep failed, will retry"),
    }
    sleep(interval).await;
}
