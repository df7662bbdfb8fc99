// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock transport and connector for deterministic testing.
//!
//! Every [`MockTransport`] created by one [`MockConnector`] writes to the same
//! [`SendLog`], which records each send with its start and end instants and
//! counts sends that overlapped another send on the same device.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flotilla_core::types::{Device, OutboundPayload, ProviderMessageId};
use flotilla_core::{DeviceId, Transport, TransportConnector, TransportError};
use tokio::time::Instant;

/// One captured send.
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub device_id: DeviceId,
    pub recipient: String,
    pub text: String,
    pub media_url: Option<String>,
    pub started: Instant,
    pub finished: Instant,
    pub succeeded: bool,
}

#[derive(Default)]
struct LogState {
    records: Vec<SendRecord>,
    active: HashMap<DeviceId, usize>,
    overlaps: usize,
}

/// Shared capture of sends across mock transports.
#[derive(Clone, Default)]
pub struct SendLog {
    state: Arc<Mutex<LogState>>,
}

impl SendLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, device_id: &DeviceId) {
        let mut state = self.lock();
        let active = state.active.entry(device_id.clone()).or_insert(0);
        *active += 1;
        if *active > 1 {
            state.overlaps += 1;
        }
    }

    fn end(&self, record: SendRecord) {
        let mut state = self.lock();
        if let Some(active) = state.active.get_mut(&record.device_id) {
            *active = active.saturating_sub(1);
        }
        state.records.push(record);
    }

    /// All sends in completion order.
    pub fn records(&self) -> Vec<SendRecord> {
        self.lock().records.clone()
    }

    /// Successful sends only.
    pub fn delivered(&self) -> Vec<SendRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.succeeded)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn for_device(&self, device_id: &DeviceId) -> Vec<SendRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| &r.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Sends that started while another send on the same device was running.
    pub fn overlaps(&self) -> usize {
        self.lock().overlaps
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.overlaps = 0;
    }
}

/// A scripted transport for one device.
pub struct MockTransport {
    device_id: DeviceId,
    log: SendLog,
    connected: AtomicBool,
    authenticated: AtomicBool,
    send_delay: Duration,
    failures: Mutex<VecDeque<TransportError>>,
    sent: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new(device_id: impl Into<DeviceId>, log: SendLog) -> Self {
        Self {
            device_id: device_id.into(),
            log,
            connected: AtomicBool::new(true),
            authenticated: AtomicBool::new(true),
            send_delay: Duration::ZERO,
            failures: Mutex::new(VecDeque::new()),
            sent: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Each send takes this long before returning.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// The next send fails with `error`. Calls queue up.
    pub fn fail_next(&self, error: TransportError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Simulate the remote side dropping the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn revoke_auth(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    /// Times `disconnect` was called on this handle.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<ProviderMessageId, TransportError> {
        let started = Instant::now();
        self.log.begin(&self.device_id);
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let failure = failure.or_else(|| (!self.is_connected()).then_some(TransportError::Closed));

        self.log.end(SendRecord {
            device_id: self.device_id.clone(),
            recipient: recipient.to_string(),
            text: payload.text.clone(),
            media_url: payload.media_url.clone(),
            started,
            finished: Instant::now(),
            succeeded: failure.is_none(),
        });

        match failure {
            Some(error) => Err(error),
            None => {
                self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(ProviderMessageId(format!("mock-{}", uuid::Uuid::new_v4())))
            }
        }
    }
}

/// How a [`MockConnector`] answers a restore for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreBehavior {
    Succeed,
    AuthRequired,
    Fail(String),
    /// Never returns; exercises the connect timeout.
    Hang,
}

/// A connector that hands out [`MockTransport`]s sharing one [`SendLog`].
pub struct MockConnector {
    log: SendLog,
    send_delay: Duration,
    behaviors: Mutex<HashMap<DeviceId, RestoreBehavior>>,
    restores: Mutex<HashMap<DeviceId, usize>>,
    handles: Mutex<HashMap<DeviceId, Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            log: SendLog::new(),
            send_delay: Duration::ZERO,
            behaviors: Mutex::new(HashMap::new()),
            restores: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Transports created from now on take `delay` per send.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn log(&self) -> SendLog {
        self.log.clone()
    }

    pub fn set_behavior(&self, device_id: impl Into<DeviceId>, behavior: RestoreBehavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.into(), behavior);
    }

    /// Number of restore calls made for the device.
    pub fn restore_count(&self, device_id: &DeviceId) -> usize {
        self.restores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    /// The most recent transport handed out for the device.
    pub fn handle(&self, device_id: &DeviceId) -> Option<Arc<MockTransport>> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(device_id)
            .cloned()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn restore(&self, device: &Device) -> Result<Arc<dyn Transport>, TransportError> {
        *self
            .restores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(device.id.clone())
            .or_insert(0) += 1;

        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&device.id)
            .cloned()
            .unwrap_or(RestoreBehavior::Succeed);
        tracing::debug!(device_id = %device.id, ?behavior, "mock restore");

        match behavior {
            RestoreBehavior::Succeed => {
                let transport = Arc::new(
                    MockTransport::new(device.id.clone(), self.log.clone())
                        .with_send_delay(self.send_delay),
                );
                self.handles
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(device.id.clone(), transport.clone());
                Ok(transport)
            }
            RestoreBehavior::AuthRequired => Err(TransportError::AuthRequired),
            RestoreBehavior::Fail(message) => Err(TransportError::Connect(message)),
            RestoreBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Closed)
            }
        }
    }
}
