// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics. Without an installed recorder every call is a
//! no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Flotilla metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "flotilla_messages_total",
        "Queue rows that reached a terminal status, by outcome"
    );
    describe_histogram!(
        "flotilla_send_latency_seconds",
        "Time spent inside Transport::send"
    );
    describe_gauge!("flotilla_inflight_sends", "Deliveries currently in flight");
    describe_counter!(
        "flotilla_reclaimed_total",
        "Rows recovered by the reclaimer, by kind"
    );
    describe_counter!("flotilla_enrollments_total", "Enrollments that inserted rows");
    describe_counter!(
        "flotilla_device_refresh_total",
        "Device session restore attempts, by result"
    );
}

/// Record a terminal outcome: `sent`, `failed`, or `skipped`.
pub fn record_outcome(outcome: &'static str) {
    metrics::counter!("flotilla_messages_total", "outcome" => outcome).increment(1);
}

/// Record how long a transport send took.
pub fn record_send_latency(seconds: f64) {
    metrics::histogram!("flotilla_send_latency_seconds").record(seconds);
}

/// Set the number of deliveries in flight.
pub fn set_inflight(count: usize) {
    metrics::gauge!("flotilla_inflight_sends").set(count as f64);
}

/// Record reclaimer activity; `kind` is `reverted` or `expired`.
pub fn record_reclaimed(kind: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!("flotilla_reclaimed_total", "kind" => kind).increment(count as u64);
    }
}

/// Record an enrollment that wrote at least one row.
pub fn record_enrollment() {
    metrics::counter!("flotilla_enrollments_total").increment(1);
}

/// Record a device restore attempt result.
pub fn record_device_refresh(result: &'static str) {
    metrics::counter!("flotilla_device_refresh_total", "result" => result).increment(1);
}
