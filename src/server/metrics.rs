use crate::engine::EngineState;
use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all scribe metrics
const PREFIX: &str = "scribe";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Job Metrics
    pub static ref JOB_STARTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_starts_total"), "Job start requests by outcome"),
        &["outcome"]
    ).expect("Failed to create job_starts_total metric");

    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Jobs reaching a terminal status"),
        &["status"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Wall time from worker start to terminal status"
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]),
        &["status"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref PROGRESS_WRITES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_progress_writes_total"),
        "Progress samples persisted to the job store"
    ).expect("Failed to create progress_writes_total metric");

    // Engine Metrics
    pub static ref ENGINE_LOCK_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_engine_lock_wait_seconds"),
            "Time jobs spent queued on the engine lock"
        )
        .buckets(vec![0.001, 0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 1800.0])
    ).expect("Failed to create engine_lock_wait_seconds metric");

    pub static ref ENGINE_STATE: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_engine_state"), "1 for the current engine state, 0 otherwise"),
        &["state"]
    ).expect("Failed to create engine_state metric");
}

const ENGINE_STATES: [EngineState; 4] = [
    EngineState::Cold,
    EngineState::Loading,
    EngineState::Ready,
    EngineState::Unavailable,
];

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_STARTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PROGRESS_WRITES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ENGINE_LOCK_WAIT_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ENGINE_STATE.clone()));

    set_engine_state(EngineState::Cold);

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Collapses per-resource paths so label cardinality stays bounded.
pub fn categorize_endpoint(path: &str) -> &'static str {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [""] => "/",
        ["jobs", _, "start"] => "/jobs/{id}/start",
        ["jobs", _, "status"] => "/jobs/{id}/status",
        _ => "other",
    }
}

pub fn record_job_start(outcome: &str) {
    JOB_STARTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_job_finished(status: &str, duration: Duration) {
    JOBS_FINISHED_TOTAL.with_label_values(&[status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
}

pub fn record_progress_write() {
    PROGRESS_WRITES_TOTAL.inc();
}

pub fn record_engine_lock_wait(waited: Duration) {
    ENGINE_LOCK_WAIT_SECONDS.observe(waited.as_secs_f64());
}

pub fn set_engine_state(state: EngineState) {
    for candidate in ENGINE_STATES {
        let value = if candidate == state { 1.0 } else { 0.0 };
        ENGINE_STATE
            .with_label_values(&[candidate.as_str()])
            .set(value);
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
