// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-device pacing.
//!
//! Each device has one gate. Holding a [`DispatchPermit`] is the only way to
//! send on a device, so sends per device are strictly sequential. A permit is
//! granted once a random delay in `[min, max]` has passed since the previous
//! permit for that device was released.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flotilla_config::model::PacingConfig;
use flotilla_core::{DeviceId, PacingOverride};
use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Jitter bounds for one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn from_secs(min: u32, max: u32) -> Self {
        Self {
            min: Duration::from_secs(u64::from(min)),
            max: Duration::from_secs(u64::from(max)),
        }
    }

    /// Per-message bounds where set, configured defaults otherwise.
    pub fn resolve(overrides: PacingOverride, defaults: &PacingConfig) -> Self {
        Self::from_secs(
            overrides
                .min_delay_secs
                .unwrap_or(defaults.default_min_delay_secs),
            overrides
                .max_delay_secs
                .unwrap_or(defaults.default_max_delay_secs),
        )
    }

    /// Uniform sample in `[min, max]` at millisecond resolution; exactly `min`
    /// when the bounds are equal or inverted.
    pub fn sample(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

#[derive(Debug, Default)]
struct GateState {
    last_release: Option<Instant>,
}

/// Exclusive right to send on one device. Dropping it releases the gate.
pub struct DispatchPermit {
    device_id: DeviceId,
    guard: OwnedMutexGuard<GateState>,
}

impl DispatchPermit {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Release explicitly; same as dropping.
    pub fn release(self) {}
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.guard.last_release = Some(Instant::now());
    }
}

/// Registry of per-device gates, created on first use.
#[derive(Default)]
pub struct DispatchGate {
    gates: DashMap<DeviceId, Arc<Mutex<GateState>>>,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the device's turn and take its permit.
    ///
    /// A device that has never released a permit proceeds immediately.
    pub async fn acquire(&self, device_id: &DeviceId, pacing: Pacing) -> DispatchPermit {
        let gate = self
            .gates
            .entry(device_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(GateState::default())))
            .clone();
        let guard = gate.lock_owned().await;

        if let Some(last) = guard.last_release {
            let wait = pacing.sample();
            let ready_at = last + wait;
            if ready_at > Instant::now() {
                debug!(device_id = %device_id, wait_ms = wait.as_millis() as u64, "pacing device");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        DispatchPermit {
            device_id: device_id.clone(),
            guard,
        }
    }

    /// Number of devices that have used the gate.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
