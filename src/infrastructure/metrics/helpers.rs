//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    ADMISSIONS_TOTAL, MESSAGES_DROPPED_TOTAL, MESSAGES_RELAYED_TOTAL, READY_NOTIFICATIONS_TOTAL,
    SESSIONS_CLOSED_TOTAL, SESSIONS_OPENED_TOTAL, SESSION_DURATION, STORE_ERRORS_TOTAL,
    STORE_OPERATION_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording admission outcomes
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    pub fn record_committed() {
        ADMISSIONS_TOTAL.with_label_values(&["committed"]).inc();
    }

    pub fn record_room_full() {
        ADMISSIONS_TOTAL.with_label_values(&["room_full"]).inc();
    }

    pub fn record_room_not_found() {
        ADMISSIONS_TOTAL.with_label_values(&["room_not_found"]).inc();
    }

    pub fn record_upgrade_failed() {
        ADMISSIONS_TOTAL.with_label_values(&["upgrade_failed"]).inc();
    }

    pub fn record_store_unavailable() {
        ADMISSIONS_TOTAL.with_label_values(&["store_unavailable"]).inc();
    }
}

/// Helper struct for recording relay fan-out
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record messages enqueued to peers
    pub fn record_relayed(count: u64) {
        MESSAGES_RELAYED_TOTAL.inc_by(count);
    }

    /// Record messages dropped on full or closed queues
    pub fn record_dropped(count: u64) {
        MESSAGES_DROPPED_TOTAL.inc_by(count);
    }

    /// Record ready notifications enqueued
    pub fn record_ready(count: u64) {
        READY_NOTIFICATIONS_TOTAL.inc_by(count);
    }
}

/// Helper struct for session lifetime metrics
pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_opened() {
        SESSIONS_OPENED_TOTAL.inc();
    }

    pub fn record_closed(duration: Duration) {
        SESSIONS_CLOSED_TOTAL.inc();
        SESSION_DURATION.observe(duration.as_secs_f64());
    }
}

/// Helper struct for capacity store operations
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record operation latency
    pub fn record_latency(backend: &str, operation: &str, duration: Duration) {
        STORE_OPERATION_LATENCY
            .with_label_values(&[backend, operation])
            .observe(duration.as_secs_f64());
    }

    /// Record an operation error
    pub fn record_error(backend: &str, operation: &str) {
        STORE_ERRORS_TOTAL
            .with_label_values(&[backend, operation])
            .inc();
    }
}
