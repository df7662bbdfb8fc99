// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recovery of rows abandoned mid-flight.

use std::sync::Arc;
use std::time::Duration;

use flotilla_config::model::ReclaimConfig;
use flotilla_core::{Clock, FlotillaError};
use flotilla_storage::queries::messages;
use flotilla_storage::Database;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{metrics, span_secs};

/// Rows moved by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// `processing` rows returned to `pending`.
    pub reverted: usize,
    /// `queued` rows failed for waiting too long.
    pub expired: usize,
}

pub struct StuckMessageReclaimer {
    db: Database,
    clock: Arc<dyn Clock>,
    config: ReclaimConfig,
}

impl StuckMessageReclaimer {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: ReclaimConfig) -> Self {
        Self { db, clock, config }
    }

    /// Revert stale claims and expire stale queued rows.
    ///
    /// Running it twice in a row changes nothing the second time.
    pub async fn sweep(&self) -> Result<ReclaimReport, FlotillaError> {
        let now = self.clock.now();
        let processing_cutoff = now - span_secs(self.config.processing_timeout_secs);
        let queued_wait = Duration::from_secs(self.config.queued_timeout_hours.saturating_mul(3600));
        let queued_cutoff = now - span_secs(queued_wait.as_secs());

        let reverted = messages::reclaim_stuck_processing(&self.db, processing_cutoff, now).await?;
        let expired = messages::expire_stale_queued(&self.db, queued_cutoff, now, move |id| {
            FlotillaError::ReclaimTimeout {
                message_id: id.to_string(),
                waited: queued_wait,
            }
            .to_string()
        })
        .await?;

        let report = ReclaimReport { reverted, expired };
        if reverted > 0 || expired > 0 {
            metrics::record_reclaimed("reverted", reverted);
            metrics::record_reclaimed("expired", expired);
            info!(reverted, expired, "reclaimed stuck messages");
        } else {
            debug!("nothing to reclaim");
        }
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "reclaim sweep failed");
                    }
                }
            }
        }
        debug!("reclaimer stopped");
    }
}
