// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign triggering and status tracking.
//!
//! A due campaign is admitted by the coordinator, its audience is spread
//! round-robin over the user's online devices, and the rows are queued in
//! one transaction. Campaign status afterwards is derived from the counts
//! of its rows; reaching a terminal status releases the user's lock.

use std::sync::Arc;
use std::time::Duration;

use flotilla_config::model::CampaignConfig;
use flotilla_core::types::{Campaign, DeviceStatus, NewMessage};
use flotilla_core::{BroadcastKind, CampaignId, CampaignStatus, Clock, FlotillaError};
use flotilla_storage::queries::{campaigns, contacts, devices, messages};
use flotilla_storage::{Database, Scope};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{BroadcastCoordinator, DenyReason, StartDecision};

/// What happened to one due campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Rows were queued.
    Started { campaign_id: CampaignId, queued: usize },
    /// Admission was refused; the campaign stays pending for the next pass.
    Deferred { campaign_id: CampaignId, reason: DenyReason },
    /// Nothing was queued, either because the audience was empty or the
    /// campaign had already left `pending`.
    Skipped { campaign_id: CampaignId },
}

pub struct CampaignDispatcher {
    db: Database,
    coordinator: Arc<BroadcastCoordinator>,
    clock: Arc<dyn Clock>,
    config: CampaignConfig,
}

impl CampaignDispatcher {
    pub fn new(
        db: Database,
        coordinator: Arc<BroadcastCoordinator>,
        clock: Arc<dyn Clock>,
        config: CampaignConfig,
    ) -> Self {
        Self {
            db,
            coordinator,
            clock,
            config,
        }
    }

    /// Start every pending campaign whose scheduled time has come.
    pub async fn trigger_due(&self) -> Result<Vec<TriggerOutcome>, FlotillaError> {
        let due = campaigns::due_pending(&self.db, self.clock.now()).await?;
        let mut outcomes = Vec::with_capacity(due.len());
        for campaign in due {
            match self.trigger(&campaign).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(campaign_id = %campaign.id, error = %e, "campaign trigger failed");
                    // Do not leave the user locked out until the lock expires.
                    if let Err(e) = self
                        .coordinator
                        .release(&campaign.user_id, campaign.id.as_str())
                        .await
                    {
                        warn!(campaign_id = %campaign.id, error = %e, "failed to release broadcast lock");
                    }
                }
            }
        }
        Ok(outcomes)
    }

    async fn trigger(&self, campaign: &Campaign) -> Result<TriggerOutcome, FlotillaError> {
        let decision = self
            .coordinator
            .try_start(&campaign.user_id, BroadcastKind::Campaign, campaign.id.as_str())
            .await?;
        if let StartDecision::Denied(reason) = decision {
            info!(campaign_id = %campaign.id, %reason, "campaign deferred");
            return Ok(TriggerOutcome::Deferred {
                campaign_id: campaign.id.clone(),
                reason,
            });
        }

        let rows = self.plan(campaign).await?;
        let planned = rows.len();
        let queued = campaigns::materialize(&self.db, &campaign.id, rows, self.clock.now()).await?;

        match queued {
            Some(n) if n > 0 => {
                info!(
                    campaign_id = %campaign.id,
                    user_id = %campaign.user_id,
                    count = n,
                    "campaign triggered"
                );
                Ok(TriggerOutcome::Started {
                    campaign_id: campaign.id.clone(),
                    queued: n,
                })
            }
            other => {
                if other.is_some() {
                    info!(campaign_id = %campaign.id, planned, "campaign had nothing to send");
                } else {
                    debug!(campaign_id = %campaign.id, "campaign no longer pending");
                }
                self.coordinator
                    .release(&campaign.user_id, campaign.id.as_str())
                    .await?;
                Ok(TriggerOutcome::Skipped {
                    campaign_id: campaign.id.clone(),
                })
            }
        }
    }

    /// One row per audience contact, assigned to online devices in turn.
    async fn plan(&self, campaign: &Campaign) -> Result<Vec<NewMessage>, FlotillaError> {
        let status = campaign
            .target_status
            .as_deref()
            .unwrap_or(&self.config.default_target_status);
        let audience =
            contacts::audience(&self.db, &campaign.user_id, campaign.niche.as_deref(), status)
                .await?;
        let online =
            devices::list_devices_with_status(&self.db, &campaign.user_id, DeviceStatus::Online)
                .await?;
        if online.is_empty() {
            warn!(campaign_id = %campaign.id, "no online device to send from");
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        Ok(audience
            .into_iter()
            .zip(online.iter().cycle())
            .map(|(contact, device)| NewMessage {
                user_id: campaign.user_id.clone(),
                device_id: device.id.clone(),
                campaign_id: Some(campaign.id.clone()),
                sequence_id: None,
                step_id: None,
                step_index: None,
                recipient: contact.phone,
                recipient_name: contact.name,
                template: campaign.template.clone(),
                media_url: campaign.media_url.clone(),
                scheduled_at: now,
                pacing: campaign.pacing,
            })
            .collect())
    }

    /// Re-derive the status of every started campaign. Returns how many changed.
    pub async fn refresh_statuses(&self) -> Result<usize, FlotillaError> {
        let mut changed = 0;
        for campaign in campaigns::list_unsettled(&self.db).await? {
            let counts = messages::counts(&self.db, Scope::Campaign(campaign.id.clone())).await?;
            let next = campaign.status.derive(&counts);
            if next == campaign.status {
                continue;
            }
            if !campaigns::transition_status(
                &self.db,
                &campaign.id,
                campaign.status,
                next,
                self.clock.now(),
            )
            .await?
            {
                continue;
            }
            changed += 1;
            info!(
                campaign_id = %campaign.id,
                from = %campaign.status,
                to = %next,
                sent = counts.sent,
                failed = counts.failed,
                "campaign status changed"
            );
            if next.is_terminal() {
                self.coordinator
                    .release(&campaign.user_id, campaign.id.as_str())
                    .await?;
            }
        }
        Ok(changed)
    }

    /// Status of one campaign as its rows currently stand, without writing it.
    pub async fn derived_status(&self, id: &CampaignId) -> Result<CampaignStatus, FlotillaError> {
        let campaign = campaigns::get_campaign(&self.db, id)
            .await?
            .ok_or_else(|| FlotillaError::NotFound {
                entity: "campaign",
                id: id.to_string(),
            })?;
        let counts = messages::counts(&self.db, Scope::Campaign(id.clone())).await?;
        Ok(campaign.status.derive(&counts))
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut trigger_tick =
            tokio::time::interval(Duration::from_secs(self.config.trigger_interval_secs));
        trigger_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut status_tick =
            tokio::time::interval(Duration::from_secs(self.config.status_interval_secs));
        status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = trigger_tick.tick() => {
                    if let Err(e) = self.trigger_due().await {
                        error!(error = %e, "campaign trigger pass failed");
                    }
                }
                _ = status_tick.tick() => {
                    if let Err(e) = self.refresh_statuses().await {
                        error!(error = %e, "campaign status refresh failed");
                    }
                }
            }
        }
        debug!("campaign dispatcher stopped");
    }
}
