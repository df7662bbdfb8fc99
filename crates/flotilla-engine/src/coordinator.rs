// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user broadcast admission.
//!
//! A user runs at most one broadcast at a time, needs at least one online
//! device to start one, and must leave a minimum gap after the previous
//! broadcast finished. The lock row is the only exclusion; it expires on its
//! own after `lock_timeout_minutes` so a crashed run cannot wedge a user.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use flotilla_config::model::CoordinatorConfig;
use flotilla_core::types::BroadcastLock;
use flotilla_core::{BroadcastKind, Clock, FlotillaError, UserId};
use flotilla_storage::queries::{campaigns, devices, locks, messages};
use flotilla_storage::Database;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::span_secs;

/// Why a broadcast may not start now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    ActiveBroadcast { kind: BroadcastKind, id: String },
    CampaignsRunning { count: u64 },
    SequencesSending { count: u64 },
    NoDevices,
    GapNotElapsed { remaining: Duration },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveBroadcast { kind, id } => {
                write!(f, "a {kind} broadcast ({id}) is already running")
            }
            Self::CampaignsRunning { count } => {
                write!(f, "{count} campaign(s) are still sending")
            }
            Self::SequencesSending { count } => {
                write!(f, "{count} sequence message(s) are being sent")
            }
            Self::NoDevices => f.write_str("no connected device is available"),
            Self::GapNotElapsed { remaining } => {
                let minutes = remaining.as_secs().div_ceil(60).max(1);
                write!(f, "please wait {minutes} minutes before starting a new campaign")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Allowed,
    Denied(DenyReason),
}

impl StartDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

pub struct BroadcastCoordinator {
    db: Database,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl BroadcastCoordinator {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: CoordinatorConfig) -> Self {
        Self { db, clock, config }
    }

    fn lock_ttl(&self) -> chrono::Duration {
        span_secs(self.config.lock_timeout_minutes.saturating_mul(60))
    }

    fn min_gap(&self) -> chrono::Duration {
        span_secs(self.config.min_gap_minutes.saturating_mul(60))
    }

    /// Decide whether `user_id` may start a broadcast of `kind` right now.
    pub async fn can_start(
        &self,
        user_id: &UserId,
        kind: BroadcastKind,
    ) -> Result<StartDecision, FlotillaError> {
        let now = self.clock.now();

        if let Some(lock) = locks::live_lock(&self.db, user_id, now - self.lock_ttl()).await? {
            return Ok(StartDecision::Denied(DenyReason::ActiveBroadcast {
                kind: lock.kind,
                id: lock.broadcast_id,
            }));
        }

        let running = campaigns::count_running(&self.db, user_id).await?;
        if running > 0 {
            return Ok(StartDecision::Denied(DenyReason::CampaignsRunning { count: running }));
        }

        if kind == BroadcastKind::Campaign {
            let sending = messages::count_sequence_sending(&self.db, user_id, now).await?;
            if sending > 0 {
                return Ok(StartDecision::Denied(DenyReason::SequencesSending {
                    count: sending,
                }));
            }
        }

        if devices::count_online(&self.db, user_id).await? == 0 {
            return Ok(StartDecision::Denied(DenyReason::NoDevices));
        }

        let last_campaign = campaigns::last_completed_at(&self.db, user_id).await?;
        let last_sequence = messages::last_sequence_sent_at(&self.db, user_id).await?;
        if let Some(last) = last_campaign.max(last_sequence) {
            let ready_at = last + self.min_gap();
            if ready_at > now {
                let remaining = (ready_at - now).to_std().unwrap_or_default();
                return Ok(StartDecision::Denied(DenyReason::GapNotElapsed { remaining }));
            }
        }

        Ok(StartDecision::Allowed)
    }

    /// Take the user's broadcast lock for `broadcast_id`.
    pub async fn lock(
        &self,
        user_id: &UserId,
        kind: BroadcastKind,
        broadcast_id: &str,
    ) -> Result<(), FlotillaError> {
        let now = self.clock.now();
        let stale_before = now - self.lock_ttl();
        if locks::try_lock(&self.db, user_id, kind, broadcast_id, now, stale_before).await? {
            debug!(user_id = %user_id, broadcast_id, %kind, "broadcast lock taken");
            return Ok(());
        }
        let reason = match locks::live_lock(&self.db, user_id, stale_before).await? {
            Some(held) => DenyReason::ActiveBroadcast {
                kind: held.kind,
                id: held.broadcast_id,
            }
            .to_string(),
            None => "broadcast lock is held".to_string(),
        };
        Err(FlotillaError::ScheduleConflict { reason })
    }

    /// Drop the user's lock, whoever holds it.
    pub async fn unlock(&self, user_id: &UserId) -> Result<bool, FlotillaError> {
        let removed = locks::unlock(&self.db, user_id).await?;
        if removed {
            debug!(user_id = %user_id, "broadcast lock released");
        }
        Ok(removed)
    }

    /// Drop the user's lock only if `broadcast_id` still holds it.
    pub async fn release(&self, user_id: &UserId, broadcast_id: &str) -> Result<bool, FlotillaError> {
        let removed = locks::unlock_broadcast(&self.db, user_id, broadcast_id).await?;
        if removed {
            debug!(user_id = %user_id, broadcast_id, "broadcast lock released");
        }
        Ok(removed)
    }

    pub async fn current(&self, user_id: &UserId) -> Result<Option<BroadcastLock>, FlotillaError> {
        locks::live_lock(&self.db, user_id, self.clock.now() - self.lock_ttl()).await
    }

    /// Every live lock across users.
    pub async fn live_locks(&self) -> Result<Vec<BroadcastLock>, FlotillaError> {
        locks::list_live(&self.db, self.clock.now() - self.lock_ttl()).await
    }

    pub async fn sweep_stale_locks(&self) -> Result<usize, FlotillaError> {
        let removed = locks::delete_stale(&self.db, self.clock.now() - self.lock_ttl()).await?;
        if removed > 0 {
            info!(count = removed, "removed stale broadcast locks");
        }
        Ok(removed)
    }

    /// Check admission and take the lock in one call.
    ///
    /// `Ok(Denied)` leaves no lock behind. A lock lost to a concurrent
    /// starter between the check and the upsert is reported as a denial too.
    pub async fn try_start(
        &self,
        user_id: &UserId,
        kind: BroadcastKind,
        broadcast_id: &str,
    ) -> Result<StartDecision, FlotillaError> {
        let decision = self.can_start(user_id, kind).await?;
        if let StartDecision::Denied(reason) = &decision {
            debug!(user_id = %user_id, broadcast_id, %reason, "broadcast start denied");
            return Ok(decision);
        }
        match self.lock(user_id, kind, broadcast_id).await {
            Ok(()) => Ok(StartDecision::Allowed),
            Err(FlotillaError::ScheduleConflict { .. }) => {
                match self.current(user_id).await? {
                    Some(held) => Ok(StartDecision::Denied(DenyReason::ActiveBroadcast {
                        kind: held.kind,
                        id: held.broadcast_id,
                    })),
                    None => Ok(StartDecision::Denied(DenyReason::ActiveBroadcast {
                        kind,
                        id: String::new(),
                    })),
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.sweep_interval_minutes.saturating_mul(60));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_stale_locks().await {
                        error!(error = %e, "stale lock sweep failed");
                    }
                }
            }
        }
        debug!("broadcast coordinator stopped");
    }
}
