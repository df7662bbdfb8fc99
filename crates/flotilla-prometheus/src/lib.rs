// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics for the Flotilla dispatch engine.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. The engine
//! records through [`recording`]; the binary installs an exporter once at
//! startup.

pub mod recording;

use std::net::SocketAddr;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use flotilla_core::FlotillaError;

pub use recording::{
    record_device_refresh, record_enrollment, record_outcome, record_reclaimed,
    record_send_latency, register_metrics, set_inflight,
};

/// Install the global recorder with an HTTP scrape listener on `listen`.
///
/// Must be called from inside a Tokio runtime. Only one recorder can be
/// installed per process.
pub fn install_exporter(listen: SocketAddr) -> Result<(), FlotillaError> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| {
            FlotillaError::Internal(format!("failed to install Prometheus exporter: {e}"))
        })?;
    register_metrics();
    tracing::info!(%listen, "prometheus exporter listening");
    Ok(())
}

/// Install the global recorder without a listener, for rendering on demand.
pub fn install_recorder() -> Result<PrometheusHandle, FlotillaError> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        FlotillaError::Internal(format!("failed to install Prometheus recorder: {e}"))
    })?;
    register_metrics();
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_outcome("sent");
        record_send_latency(0.25);
        set_inflight(3);
        record_reclaimed("reverted", 0);
        record_enrollment();
        record_device_refresh("ok");
    }

    #[test]
    fn recorder_renders_flotilla_metrics() {
        // Process-global: this is the only test that installs a recorder.
        let handle = install_recorder().unwrap();
        record_outcome("failed");
        record_reclaimed("expired", 2);
        let text = handle.render();
        assert!(text.contains("flotilla_messages_total"));
        assert!(text.contains("outcome=\"failed\""));
        assert!(text.contains("flotilla_reclaimed_total"));
    }
}
