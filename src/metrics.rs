use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Instant;

use crate::error::{Result, TelemetryError};

lazy_static! {
    // Collection metrics
    pub static ref COLLECTION_PASSES: IntCounter = register_int_counter!(
        "telemetry_collection_passes_total",
        "Total number of collection passes run"
    ).unwrap();

    pub static ref COLLECTION_DURATION: Histogram = register_histogram!(
        "telemetry_collection_duration_seconds",
        "Duration of a collection pass in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    ).unwrap();

    pub static ref COLLECTOR_FAILURES: IntCounterVec = register_int_counter_vec!(
        "telemetry_collector_failures_total",
        "Collectors that returned nothing, by record key",
        &["collector"]
    ).unwrap();

    // Publish metrics
    pub static ref PUBLISH_FAILURES: IntCounterVec = register_int_counter_vec!(
        "telemetry_publish_failures_total",
        "Failed publishes to the telemetry server, by endpoint",
        &["endpoint"]
    ).unwrap();

    // Storage metrics
    pub static ref RECORDS_PERSISTED: IntCounter = register_int_counter!(
        "telemetry_records_persisted_total",
        "Total number of records written to Postgres"
    ).unwrap();

    // Request metrics
    pub static ref REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "telemetry_requests_total",
        "Total number of HTTP requests received, by route",
        &["route"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "telemetry_request_duration_seconds",
        "Request duration in seconds, by route",
        &["route"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).unwrap();
}

pub struct RequestTimer {
    route: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(route: &'static str) -> Self {
        REQUEST_COUNTER.with_label_values(&[route]).inc();
        Self {
            route,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        REQUEST_DURATION.with_label_values(&[self.route]).observe(duration);
    }
}

pub fn record_collection_pass(duration: f64) {
    COLLECTION_PASSES.inc();
    COLLECTION_DURATION.observe(duration);
}

pub fn record_collector_failure(key: &str) {
    COLLECTOR_FAILURES.with_label_values(&[key]).inc();
}

pub fn record_publish_failure(endpoint: &str) {
    PUBLISH_FAILURES.with_label_values(&[endpoint]).inc();
}

pub fn record_persisted() {
    RECORDS_PERSISTED.inc();
}

/// Everything in the default registry, in the Prometheus text format.
pub fn gather() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| TelemetryError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Internal(e.to_string()))
}
