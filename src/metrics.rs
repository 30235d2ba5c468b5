//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Remote API Metrics
    pub static ref REMOTE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("omgsync_remote_requests_total", "Total number of remote API requests"),
        &["method", "status"]
    ).expect("metric can be created");
    pub static ref REMOTE_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "omgsync_remote_request_duration_seconds",
            "Remote API request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["method"]
    ).expect("metric can be created");

    // Sync Metrics
    pub static ref SYNC_CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("omgsync_sync_cycles_total", "Total number of fetch-and-cache cycles"),
        &["kind", "result"]
    ).expect("metric can be created");
    pub static ref GATE_SKIPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("omgsync_gate_skips_total", "Operations skipped by the session gate"),
        &["kind", "reason"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("omgsync_cache_size", "Current number of cached entities"),
        &["entity_kind"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("omgsync_errors_total", "Total number of errors"),
        &["error_type", "operation"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(REMOTE_REQUESTS_TOTAL.clone()))
        .expect("REMOTE_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(REMOTE_REQUEST_DURATION_SECONDS.clone()))
        .expect("REMOTE_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(SYNC_CYCLES_TOTAL.clone()))
        .expect("SYNC_CYCLES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(GATE_SKIPS_TOTAL.clone()))
        .expect("GATE_SKIPS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_SIZE.clone()))
        .expect("CACHE_SIZE can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record one remote request.
pub fn observe_remote_request(method: &str, status: &str, elapsed: Duration) {
    REMOTE_REQUESTS_TOTAL
        .with_label_values(&[method, status])
        .inc();
    REMOTE_REQUEST_DURATION_SECONDS
        .with_label_values(&[method])
        .observe(elapsed.as_secs_f64());
}

/// Encode all registered metrics in Prometheus text format.
pub fn render_metrics() -> Result<String, crate::error::AppError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::error::AppError::Internal(e.into()))?;
    String::from_utf8(buffer).map_err(|e| crate::error::AppError::Internal(e.into()))
}
