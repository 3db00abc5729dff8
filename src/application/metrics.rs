//! Session and registration metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding application.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Describe every metric once at startup
pub fn describe_metrics() {
    describe_counter!(
        "ims_registrations_total",
        "Total number of REGISTER attempts"
    );
    describe_counter!(
        "ims_sessions_started_total",
        "Total number of sessions that reached the established state"
    );
    describe_counter!(
        "ims_sessions_failed_total",
        "Total number of sessions that ended with an error"
    );
    describe_counter!(
        "ims_sessions_terminated_total",
        "Total number of sessions that ended without error"
    );
    describe_histogram!(
        "ims_session_duration_seconds",
        "Time spent in the established state"
    );
    describe_gauge!(
        "ims_active_sessions",
        "Number of sessions currently registered"
    );
}

/// Record a registration attempt
pub fn record_registration(success: bool) {
    counter!("ims_registrations_total", "success" => success.to_string()).increment(1);
}

pub fn record_session_started(kind: &str) {
    counter!("ims_sessions_started_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_session_failed(kind: &str, reason: &str) {
    counter!("ims_sessions_failed_total", "kind" => kind.to_string(), "reason" => reason.to_string())
        .increment(1);
}

pub fn record_session_terminated(kind: &str) {
    counter!("ims_sessions_terminated_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_session_duration(kind: &str, duration: Duration) {
    histogram!("ims_session_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Update active sessions gauge
pub fn update_active_sessions(count: usize) {
    gauge!("ims_active_sessions").set(count as f64);
}
