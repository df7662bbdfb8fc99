// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric hooks that compile away without the `prometheus` feature.

#[cfg(feature = "prometheus")]
pub(crate) use flotilla_prometheus::{
    record_device_refresh, record_enrollment, record_outcome, record_reclaimed,
    record_send_latency, set_inflight,
};

#[cfg(not(feature = "prometheus"))]
pub(crate) fn record_outcome(_outcome: &'static str) {}

#[cfg(not(feature = "prometheus"))]
pub(crate) fn record_send_latency(_seconds: f64) {}

#[cfg(not(feature = "prometheus"))]
pub(crate) fn set_inflight(_count: usize) {}

#[cfg(not(feature = "prometheus"))]
pub(crate) fn record_reclaimed(_kind: &'static str, _count: usize) {}

#[cfg(not(feature = "prometheus"))]
pub(crate) fn record_enrollment() {}

#[cfg(not(feature = "prometheus"))]
pub(crate) fn record_device_refresh(_result: &'static str) {}
