// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatch worker pool.
//!
//! Each poll claims at most one due row per device that has no delivery in
//! flight, bounded by a global semaphore. A claimed row is delivered on its
//! own task: resolve the device handle, wait for the device gate, render,
//! confirm the claim is still ours, send, and write the outcome. Outcome
//! writes are compare-and-set on the claim token, so a row the reclaimer took
//! back is never sent or overwritten.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use flotilla_config::model::{DispatchConfig, PacingConfig};
use flotilla_core::types::{OutboundPayload, QueuedMessage, RenderContext};
use flotilla_core::{ClaimedMessage, Clock, DeviceId, FlotillaError, TemplateRenderer};
use flotilla_storage::queries::messages::{self, Scope};
use flotilla_storage::Database;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::scheduler::{DispatchGate, Pacing};

/// Called after a sequence row is recorded as sent.
#[async_trait]
pub trait ProgressionHook: Send + Sync + 'static {
    async fn on_step_sent(&self, message: &QueuedMessage) -> Result<(), FlotillaError>;
}

/// How one delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Skipped,
    /// The claim was reverted before the outcome could be written.
    LostClaim,
}

/// Marks a device busy and holds a global slot until the delivery ends.
struct Slot {
    in_flight: Arc<DashSet<DeviceId>>,
    device_id: DeviceId,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.remove(&self.device_id);
        metrics::set_inflight(self.in_flight.len());
    }
}

pub struct DispatchWorkerPool {
    db: Database,
    registry: Arc<ConnectionRegistry>,
    gate: Arc<DispatchGate>,
    renderer: Arc<dyn TemplateRenderer>,
    hook: Option<Arc<dyn ProgressionHook>>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashSet<DeviceId>>,
    dispatch: DispatchConfig,
    pacing: PacingConfig,
}

impl DispatchWorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        registry: Arc<ConnectionRegistry>,
        gate: Arc<DispatchGate>,
        renderer: Arc<dyn TemplateRenderer>,
        hook: Option<Arc<dyn ProgressionHook>>,
        clock: Arc<dyn Clock>,
        dispatch: DispatchConfig,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(dispatch.max_concurrent_sends.max(1))),
            in_flight: Arc::new(DashSet::new()),
            db,
            registry,
            gate,
            renderer,
            hook,
            clock,
            dispatch,
            pacing,
        }
    }

    /// Deliveries currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Claim what can be claimed right now and spawn its deliveries.
    ///
    /// Returns the number of rows claimed. Never waits for a free slot: a
    /// saturated pool ends the pass.
    pub async fn poll_once(
        self: &Arc<Self>,
        deliveries: &mut JoinSet<DeliveryOutcome>,
    ) -> Result<usize, FlotillaError> {
        let due = messages::fetch_due(&self.db, self.clock.now(), self.dispatch.batch_size).await?;
        let mut claimed = 0;

        for row in due {
            if self.in_flight.contains(&row.device_id) {
                continue;
            }
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("dispatch pool saturated");
                break;
            };
            if !self.in_flight.insert(row.device_id.clone()) {
                continue;
            }
            let slot = Slot {
                in_flight: self.in_flight.clone(),
                device_id: row.device_id.clone(),
                _permit: permit,
            };

            let token = uuid::Uuid::new_v4().to_string();
            let Some(message) = messages::claim(&self.db, &row.id, &token, self.clock.now()).await?
            else {
                debug!(message_id = %row.id, "claim lost to another worker");
                continue;
            };
            claimed += 1;
            metrics::set_inflight(self.in_flight.len());

            let pool = Arc::clone(self);
            deliveries.spawn(async move {
                let _slot = slot;
                pool.deliver(ClaimedMessage { message, token }).await
            });
        }

        if claimed > 0 {
            debug!(count = claimed, "claimed due messages");
        }
        Ok(claimed)
    }

    /// Deliver one claimed row and record the outcome.
    pub async fn deliver(&self, claimed: ClaimedMessage) -> DeliveryOutcome {
        let ClaimedMessage { message, token } = claimed;

        let handle = match self.registry.get_or_refresh(&message.device_id).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    device_id = %message.device_id,
                    error = %e,
                    transient = e.is_transient(),
                    "device unavailable, skipping message"
                );
                let written =
                    messages::mark_skipped(&self.db, &message.id, &token, &e.to_string(), self.clock.now())
                        .await;
                return self.settle(&message, written, DeliveryOutcome::Skipped);
            }
        };

        let pacing = Pacing::resolve(message.pacing, &self.pacing);
        let permit = self.gate.acquire(&message.device_id, pacing).await;

        match messages::renew_claim(&self.db, &message.id, &token, self.clock.now()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    message_id = %message.id,
                    device_id = %message.device_id,
                    "claim was reclaimed while waiting to send, dropping delivery"
                );
                return DeliveryOutcome::LostClaim;
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "failed to renew claim before send");
                return DeliveryOutcome::LostClaim;
            }
        }

        let text = self.renderer.render(
            &message.template,
            &RenderContext {
                recipient_name: &message.recipient_name,
                device_id: &message.device_id,
                recipient: &message.recipient,
            },
        );
        let payload = OutboundPayload {
            text,
            media_url: message.media_url.clone(),
        };

        let started = std::time::Instant::now();
        let result = handle.send(&message.recipient, &payload).await;
        permit.release();
        metrics::record_send_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(provider_id) => {
                let written = messages::mark_sent(
                    &self.db,
                    &message.id,
                    &token,
                    provider_id.as_str(),
                    self.clock.now(),
                )
                .await;
                let outcome = self.settle(&message, written, DeliveryOutcome::Sent);
                if outcome == DeliveryOutcome::Sent && message.sequence_id.is_some() {
                    self.progress(&message).await;
                }
                outcome
            }
            Err(e) => {
                let error = FlotillaError::SendFailed {
                    message: e.to_string(),
                };
                warn!(
                    message_id = %message.id,
                    device_id = %message.device_id,
                    error = %error,
                    "send failed"
                );
                let written = messages::mark_failed(
                    &self.db,
                    &message.id,
                    &token,
                    &error.to_string(),
                    self.clock.now(),
                )
                .await;
                self.settle(&message, written, DeliveryOutcome::Failed)
            }
        }
    }

    fn settle(
        &self,
        message: &QueuedMessage,
        written: Result<bool, FlotillaError>,
        outcome: DeliveryOutcome,
    ) -> DeliveryOutcome {
        match written {
            Ok(true) => {
                metrics::record_outcome(match outcome {
                    DeliveryOutcome::Sent => "sent",
                    DeliveryOutcome::Failed => "failed",
                    _ => "skipped",
                });
                debug!(message_id = %message.id, ?outcome, "message settled");
                outcome
            }
            Ok(false) => {
                warn!(
                    message_id = %message.id,
                    ?outcome,
                    "claim was reclaimed before the outcome was recorded"
                );
                DeliveryOutcome::LostClaim
            }
            Err(e) => {
                // The row stays processing; the reclaimer returns it to the queue.
                error!(message_id = %message.id, error = %e, "failed to record delivery outcome");
                DeliveryOutcome::LostClaim
            }
        }
    }

    async fn progress(&self, message: &QueuedMessage) {
        let Some(hook) = &self.hook else {
            return;
        };
        let sent = match messages::get_message(&self.db, &message.id).await {
            Ok(Some(row)) => row,
            Ok(None) => return,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "failed to reload sent message");
                return;
            }
        };
        if let Err(e) = hook.on_step_sent(&sent).await {
            warn!(message_id = %message.id, error = %e, "sequence progression failed");
        }
    }

    /// Queue fresh attempts for failed rows in scope. Failed rows stay failed.
    pub async fn retry_failed(&self, scope: Scope) -> Result<usize, FlotillaError> {
        let count = messages::retry_failed(&self.db, scope.clone(), self.clock.now()).await?;
        info!(count, ?scope, "queued retries for failed messages");
        Ok(count)
    }

    /// Poll on an interval until cancelled, then drain in-flight deliveries.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut deliveries = JoinSet::new();
        let mut ticker = tokio::time::interval(self.dispatch.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            max_concurrent = self.dispatch.max_concurrent_sends,
            batch_size = self.dispatch.batch_size,
            "dispatch pool running"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    reap(&mut deliveries);
                    match self.poll_once(&mut deliveries).await {
                        Ok(_) => {}
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "dispatch poll failed, retrying next tick");
                        }
                        Err(e) => error!(error = %e, "dispatch poll failed"),
                    }
                }
            }
        }

        self.drain(deliveries, self.dispatch.drain_timeout()).await;
        info!("dispatch pool stopped");
    }

    async fn drain(&self, mut deliveries: JoinSet<DeliveryOutcome>, timeout: Duration) {
        if deliveries.is_empty() {
            return;
        }
        info!(count = deliveries.len(), "draining in-flight deliveries");
        let finished = tokio::time::timeout(timeout, async {
            while deliveries.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(
                remaining = deliveries.len(),
                "drain timeout reached, aborting deliveries"
            );
            deliveries.abort_all();
            while deliveries.join_next().await.is_some() {}
        }
    }
}

fn reap(deliveries: &mut JoinSet<DeliveryOutcome>) {
    while let Some(joined) = deliveries.try_join_next() {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "delivery task panicked");
            }
        }
    }
}
