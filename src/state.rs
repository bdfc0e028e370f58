//! # Application State Management
//!
//! Shared state handed to every HTTP request handler. Two kinds of things
//! live here:
//!
//! - **Service handles**: the ledger, catalog, history store, gateway and
//!   coordinator, constructed exactly once at process start and shared by
//!   `Arc`. There are no process-wide singletons; ownership is explicit and
//!   the lifecycle is the process lifecycle.
//! - **Operational data**: the runtime-updatable configuration and request
//!   metrics, each behind `Arc<RwLock<...>>`.
//!
//! The locks here guard quick in-memory reads/writes only; nothing holds
//! them across I/O.

use crate::billing::{CreditLedger, ModelCatalog, PredictionHistoryStore};
use crate::config::AppConfig;
use crate::inference::{BackendKind, HttpAsrBackend, InferenceGateway};
use crate::transcription::TranscriptionCoordinator;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    pub ledger: Arc<CreditLedger>,
    pub catalog: Arc<ModelCatalog>,
    pub history: Arc<PredictionHistoryStore>,
    pub gateway: Arc<InferenceGateway>,
    pub coordinator: Arc<TranscriptionCoordinator>,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Transcription sagas currently between Reserve and Resolve
    pub predictions_in_flight: u32,

    /// Detailed metrics for each API endpoint
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the full service graph from a validated configuration.
    ///
    /// The remote HTTP family is the only backend wired by default, matching
    /// the deployment shape where recognition runs in a separate ASR
    /// service. Embedders hosting engines in-process add an
    /// `EmbeddedAsrBackend` to the gateway here.
    pub fn new(config: AppConfig) -> Self {
        let http_backend = Arc::new(HttpAsrBackend::new(config.inference.asr_base_url.clone()));
        let gateway = Arc::new(
            InferenceGateway::new(config.inference.request_timeout())
                .with_family(BackendKind::WhisperHttp, http_backend),
        );

        let ledger = Arc::new(CreditLedger::new());
        let catalog = Arc::new(ModelCatalog::new(Arc::clone(&gateway)));
        let history = Arc::new(PredictionHistoryStore::new());
        let coordinator = Arc::new(TranscriptionCoordinator::new(
            Arc::clone(&catalog),
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&history),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            ledger,
            catalog,
            history,
            gateway,
            coordinator,
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    ///
    /// Note: the gateway timeout and ASR base URL are read at startup; a
    /// runtime update changes what the config endpoints report and what new
    /// accounts are granted, not already-wired backends.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A transcription saga entered its in-flight window.
    pub fn increment_predictions_in_flight(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.predictions_in_flight += 1;
    }

    /// A transcription saga settled (either way).
    pub fn decrement_predictions_in_flight(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.predictions_in_flight > 0 {
            metrics.predictions_in_flight -= 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            predictions_in_flight: metrics.predictions_in_flight,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
