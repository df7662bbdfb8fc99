// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `flotilla serve` command implementation.
//!
//! Opens storage, wires the engine around the dry-run transport, and runs
//! every background loop until SIGINT or SIGTERM. Real messaging clients
//! plug in through [`TransportConnector`]; the dry-run connector only logs
//! what would have been sent.

use std::sync::Arc;

use async_trait::async_trait;
use flotilla_config::FlotillaConfig;
use flotilla_core::types::{Device, OutboundPayload, ProviderMessageId};
use flotilla_core::{
    DeviceId, FlotillaError, PlaceholderRenderer, Transport, TransportConnector, TransportError,
};
use flotilla_engine::{install_signal_handler, Engine};
use flotilla_storage::Database;
use tracing::info;

/// Transport that logs each send instead of delivering it.
pub struct DryRunTransport {
    device_id: DeviceId,
}

#[async_trait]
impl Transport for DryRunTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) {
        info!(device_id = %self.device_id, "dry-run transport disconnected");
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<ProviderMessageId, TransportError> {
        info!(
            device_id = %self.device_id,
            recipient,
            chars = payload.text.chars().count(),
            media = payload.media_url.is_some(),
            "dry-run send"
        );
        Ok(ProviderMessageId(format!("dry-run-{}", uuid::Uuid::new_v4())))
    }
}

/// Restores a [`DryRunTransport`] for every paired device.
pub struct DryRunConnector;

#[async_trait]
impl TransportConnector for DryRunConnector {
    async fn restore(&self, device: &Device) -> Result<Arc<dyn Transport>, TransportError> {
        if !device.has_credentials() {
            return Err(TransportError::AuthRequired);
        }
        Ok(Arc::new(DryRunTransport {
            device_id: device.id.clone(),
        }))
    }
}

/// Open storage and assemble the engine.
pub async fn build_engine(config: FlotillaConfig) -> Result<Engine, FlotillaError> {
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
    Engine::builder()
        .config(config)
        .database(db)
        .connector(Arc::new(DryRunConnector))
        .renderer(Arc::new(PlaceholderRenderer))
        .build()
}

#[cfg(feature = "prometheus")]
fn start_metrics(config: &FlotillaConfig) -> Result<(), FlotillaError> {
    if !config.metrics.enabled {
        return Ok(());
    }
    let listen = config.metrics.listen.parse().map_err(|e| {
        FlotillaError::Config(format!("invalid metrics.listen '{}': {e}", config.metrics.listen))
    })?;
    flotilla_prometheus::install_exporter(listen)
}

#[cfg(not(feature = "prometheus"))]
fn start_metrics(config: &FlotillaConfig) -> Result<(), FlotillaError> {
    if config.metrics.enabled {
        tracing::warn!("metrics enabled in config but the prometheus feature is not compiled in");
    }
    Ok(())
}

/// Runs the `flotilla serve` command.
pub async fn run_serve(config: FlotillaConfig) -> Result<(), FlotillaError> {
    info!(name = config.engine.name.as_str(), "starting flotilla serve");
    start_metrics(&config)?;

    let engine = build_engine(config).await?;
    let cancel = install_signal_handler();
    let group = engine.start(cancel.clone());

    cancel.cancelled().await;
    info!("shutdown requested");
    engine.shutdown(group).await;

    let db = engine.database().clone();
    drop(engine);
    db.close().await?;
    info!("flotilla stopped");
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "flotilla={log_level},flotilla_engine={log_level},flotilla_storage={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
