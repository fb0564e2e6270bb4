use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::models::api::Mode;
use crate::services::{
    control::JobControl,
    step::StepExecutor,
    store::JobStore,
    ticker::TickExecutor,
    worker::JobWorker,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub worker: Arc<JobWorker>,
    pub ticker: Arc<TickExecutor>,
    pub default_delay_seconds: u64,
    pub prometheus: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn StepExecutor>,
        default_delay_seconds: u64,
    ) -> Self {
        Self {
            worker: Arc::new(JobWorker::new(executor.clone())),
            ticker: Arc::new(TickExecutor::new(store.clone(), executor)),
            store,
            default_delay_seconds,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(Arc::new(handle));
        self
    }

    /// The execution model serving `mode`.
    pub fn jobs(&self, mode: Mode) -> &dyn JobControl {
        match mode {
            Mode::Live => self.worker.as_ref(),
            Mode::Durable => self.ticker.as_ref(),
        }
    }
}
