// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live transport handles, one per device.
//!
//! The registry restores sessions lazily: the first delivery for a device
//! whose handle is missing or unhealthy triggers a restore from persisted
//! credentials. Concurrent callers for the same device wait on a per-device
//! lock and reuse the handle the first caller produced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flotilla_core::types::{Device, DeviceStatus};
use flotilla_core::{
    Clock, DeviceId, FlotillaError, HealthStatus, Transport, TransportConnector, TransportError,
};
use flotilla_storage::Database;
use flotilla_storage::queries::devices;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::metrics;

/// Map from device id to its live transport handle.
pub struct ConnectionRegistry {
    handles: RwLock<HashMap<DeviceId, Arc<dyn Transport>>>,
    refresh_locks: DashMap<DeviceId, Arc<Mutex<()>>>,
    connector: Arc<dyn TransportConnector>,
    db: Database,
    clock: Arc<dyn Clock>,
    connect_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        db: Database,
        connector: Arc<dyn TransportConnector>,
        clock: Arc<dyn Clock>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            refresh_locks: DashMap::new(),
            connector,
            db,
            clock,
            connect_timeout,
        }
    }

    /// The registered handle, without attempting a restore.
    pub async fn get(&self, device_id: &DeviceId) -> Result<Arc<dyn Transport>, FlotillaError> {
        self.handles
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| FlotillaError::DeviceUnavailable {
                device_id: device_id.to_string(),
            })
    }

    /// A healthy handle for the device, restoring the session if needed.
    pub async fn get_or_refresh(
        &self,
        device_id: &DeviceId,
    ) -> Result<Arc<dyn Transport>, FlotillaError> {
        if let Some(handle) = self.healthy(device_id).await {
            return Ok(handle);
        }

        let lock = self
            .refresh_locks
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have restored it while we waited.
        if let Some(handle) = self.healthy(device_id).await {
            return Ok(handle);
        }

        self.refresh(device_id).await
    }

    async fn healthy(&self, device_id: &DeviceId) -> Option<Arc<dyn Transport>> {
        let handles = self.handles.read().await;
        let handle = handles.get(device_id)?;
        (handle.health() == HealthStatus::Healthy).then(|| handle.clone())
    }

    async fn refresh(&self, device_id: &DeviceId) -> Result<Arc<dyn Transport>, FlotillaError> {
        let unavailable = || FlotillaError::DeviceUnavailable {
            device_id: device_id.to_string(),
        };
        let Some(device) = devices::get_device(&self.db, device_id).await? else {
            warn!(device_id = %device_id, "unknown device");
            return Err(unavailable());
        };
        if !device.has_credentials() {
            warn!(device_id = %device_id, "device has no stored session, pairing required");
            return Err(unavailable());
        }

        devices::set_device_status(&self.db, device_id, DeviceStatus::Connecting, self.clock.now())
            .await?;
        info!(device_id = %device_id, "restoring device session");

        match tokio::time::timeout(self.connect_timeout, self.connector.restore(&device)).await {
            Ok(Ok(handle)) => {
                self.install(device_id, handle.clone()).await;
                if let Err(e) =
                    devices::set_device_status(&self.db, device_id, DeviceStatus::Online, self.clock.now())
                        .await
                {
                    warn!(device_id = %device_id, error = %e, "failed to record device online");
                }
                metrics::record_device_refresh("ok");
                info!(device_id = %device_id, "device session restored");
                Ok(handle)
            }
            Ok(Err(e)) => {
                self.mark_offline(&device).await;
                Err(match e {
                    TransportError::AuthRequired => {
                        metrics::record_device_refresh("auth_required");
                        warn!(device_id = %device_id, "stored session rejected, re-pairing required");
                        FlotillaError::DeviceAuthRequired {
                            device_id: device_id.to_string(),
                        }
                    }
                    other => {
                        metrics::record_device_refresh("error");
                        warn!(device_id = %device_id, error = %other, "device session restore failed");
                        FlotillaError::ConnectFailed {
                            device_id: device_id.to_string(),
                            message: other.to_string(),
                        }
                    }
                })
            }
            Err(_) => {
                self.mark_offline(&device).await;
                metrics::record_device_refresh("timeout");
                warn!(
                    device_id = %device_id,
                    timeout_secs = self.connect_timeout.as_secs(),
                    "device session restore timed out"
                );
                Err(FlotillaError::ConnectFailed {
                    device_id: device_id.to_string(),
                    message: format!("timed out after {:?}", self.connect_timeout),
                })
            }
        }
    }

    /// Cache `handle`, disconnecting whatever it replaces.
    async fn install(&self, device_id: &DeviceId, handle: Arc<dyn Transport>) {
        let previous = self
            .handles
            .write()
            .await
            .insert(device_id.clone(), handle);
        if let Some(previous) = previous {
            debug!(device_id = %device_id, "replacing existing handle");
            previous.disconnect().await;
        }
    }

    async fn mark_offline(&self, device: &Device) {
        let stale = self.handles.write().await.remove(&device.id);
        if let Some(stale) = stale {
            stale.disconnect().await;
        }
        if let Err(e) =
            devices::set_device_status(&self.db, &device.id, DeviceStatus::Offline, self.clock.now()).await
        {
            warn!(device_id = %device.id, error = %e, "failed to record device offline");
        }
    }

    /// Hand a freshly paired handle to the registry.
    pub async fn register(
        &self,
        device_id: DeviceId,
        handle: Arc<dyn Transport>,
    ) -> Result<(), FlotillaError> {
        self.install(&device_id, handle).await;
        devices::set_device_status(&self.db, &device_id, DeviceStatus::Online, self.clock.now())
            .await?;
        info!(device_id = %device_id, "device registered");
        Ok(())
    }

    /// Disconnect and forget a device's handle.
    pub async fn remove(&self, device_id: &DeviceId) -> Result<(), FlotillaError> {
        let removed = self.handles.write().await.remove(device_id);
        if let Some(handle) = removed {
            handle.disconnect().await;
        }
        self.refresh_locks.remove(device_id);
        devices::set_device_status(&self.db, device_id, DeviceStatus::Offline, self.clock.now())
            .await?;
        info!(device_id = %device_id, "device removed");
        Ok(())
    }

    /// Disconnect every handle. Device rows are left as they are so the next
    /// start can restore them.
    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = self.handles.write().await.drain().collect();
        let count = drained.len();
        for (device_id, handle) in drained {
            debug!(device_id = %device_id, "disconnecting device");
            handle.disconnect().await;
        }
        info!(count, "disconnected all devices");
    }

    /// Devices whose handle is currently healthy, sorted by id.
    pub async fn connected_devices(&self) -> Vec<DeviceId> {
        let handles = self.handles.read().await;
        let mut out = Vec::new();
        for (device_id, handle) in handles.iter() {
            if handle.health() == HealthStatus::Healthy {
                out.push(device_id.clone());
            }
        }
        out.sort();
        out
    }
}
