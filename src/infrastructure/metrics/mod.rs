//! Prometheus metrics for the signaling relay.
//!
//! - Room lifecycle (created, swept)
//! - Admission outcomes
//! - Live registry gauges
//! - Relay throughput and drops
//! - Capacity store latency and errors

mod helpers;

pub use helpers::{encode_metrics, AdmissionMetrics, RelayMetrics, SessionMetrics, StoreMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Room Metrics
    // ============================================================================

    /// Rooms created through the HTTP endpoint
    pub static ref ROOMS_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rooms_created_total", METRIC_PREFIX),
        "Total rooms created"
    ).unwrap();

    /// Generated room ids that collided with an existing room
    pub static ref ROOM_ID_COLLISIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_room_id_collisions_total", METRIC_PREFIX),
        "Total generated room ids rejected as duplicates"
    ).unwrap();

    /// Rooms reclaimed by the sweeper
    pub static ref ROOMS_SWEPT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_rooms_swept_total", METRIC_PREFIX),
        "Total unused rooms reclaimed by the sweeper"
    ).unwrap();

    // ============================================================================
    // Admission Metrics
    // ============================================================================

    /// Admission attempts by outcome
    pub static ref ADMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_admissions_total", METRIC_PREFIX),
        "Total admission attempts by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Registry Metrics
    // ============================================================================

    /// Rooms with at least one connected session
    pub static ref LIVE_ROOMS: IntGauge = register_int_gauge!(
        format!("{}_live_rooms", METRIC_PREFIX),
        "Number of rooms with at least one connected session"
    ).unwrap();

    /// Connected sessions
    pub static ref LIVE_SESSIONS: IntGauge = register_int_gauge!(
        format!("{}_live_sessions", METRIC_PREFIX),
        "Number of connected signaling sessions"
    ).unwrap();

    /// Ready notifications fanned out (one per session)
    pub static ref READY_NOTIFICATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ready_notifications_total", METRIC_PREFIX),
        "Total ready notifications enqueued"
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    /// Messages enqueued to a peer
    pub static ref MESSAGES_RELAYED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_relayed_total", METRIC_PREFIX),
        "Total signaling messages enqueued to a peer"
    ).unwrap();

    /// Messages dropped because the peer's outbound queue was full or closed
    pub static ref MESSAGES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_dropped_total", METRIC_PREFIX),
        "Total signaling messages dropped for a slow or closed peer"
    ).unwrap();

    // ============================================================================
    // Session Metrics
    // ============================================================================

    /// Sessions opened
    pub static ref SESSIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_sessions_opened_total", METRIC_PREFIX),
        "Total signaling sessions opened"
    ).unwrap();

    /// Sessions closed
    pub static ref SESSIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_sessions_closed_total", METRIC_PREFIX),
        "Total signaling sessions closed"
    ).unwrap();

    /// Session duration
    pub static ref SESSION_DURATION: Histogram = register_histogram!(
        format!("{}_session_duration_seconds", METRIC_PREFIX),
        "Signaling session duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Store Metrics
    // ============================================================================

    /// Capacity store operation latency
    pub static ref STORE_OPERATION_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_store_operation_latency_seconds", METRIC_PREFIX),
        "Capacity store operation latency in seconds",
        &["backend", "operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).unwrap();

    /// Capacity store operation errors
    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Total capacity store operation errors",
        &["backend", "operation"]
    ).unwrap();
}
