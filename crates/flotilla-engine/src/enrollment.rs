// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence enrollment and progression.
//!
//! Enrolling a contact walks the sequence graph from the root sequence and
//! queues the resulting steps in one transaction. Enrolling the same contact
//! twice inserts nothing the second time. The trigger sweep picks up contacts
//! whose tags name an active sequence's entry trigger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flotilla_config::model::EnrollmentConfig;
use flotilla_config::ProgressionPolicy;
use flotilla_core::sequence::StepSchedule;
use flotilla_core::types::{Contact, QueuedMessage};
use flotilla_core::{Clock, ContactId, FlotillaError, SequenceId};
use flotilla_storage::queries::{contacts, enrollments, sequences};
use flotilla_storage::{Database, EnrollRequest, EnrollmentReport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{metrics, span_secs};
use crate::pool::ProgressionHook;

/// Result of one trigger sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerBatchReport {
    pub enrolled: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct SequenceEnrollmentEngine {
    db: Database,
    clock: Arc<dyn Clock>,
    config: EnrollmentConfig,
}

impl SequenceEnrollmentEngine {
    pub fn new(db: Database, clock: Arc<dyn Clock>, config: EnrollmentConfig) -> Self {
        Self { db, clock, config }
    }

    pub fn policy(&self) -> ProgressionPolicy {
        self.config.policy
    }

    fn schedule(&self) -> StepSchedule {
        StepSchedule {
            bootstrap: span_secs(self.config.bootstrap_delay_secs),
            default_step_delay: chrono::Duration::hours(i64::from(
                self.config.default_step_delay_hours,
            )),
            first_step_only: self.config.policy == ProgressionPolicy::ChainActivation,
        }
    }

    /// Enroll `contact` into `sequence_id`, sending from the contact's device.
    ///
    /// A repeat enrollment is not an error: the report comes back with
    /// nothing inserted.
    pub async fn enroll(
        &self,
        contact: &Contact,
        sequence_id: &SequenceId,
        trigger: Option<&str>,
    ) -> Result<EnrollmentReport, FlotillaError> {
        if sequences::get_sequence(&self.db, sequence_id).await?.is_none() {
            return Err(FlotillaError::NotFound {
                entity: "sequence",
                id: sequence_id.to_string(),
            });
        }

        let request = EnrollRequest {
            user_id: contact.user_id.clone(),
            device_id: contact.device_id.clone(),
            contact_id: Some(contact.id.clone()),
            recipient: contact.phone.clone(),
            recipient_name: contact.name.clone(),
            sequence_id: sequence_id.clone(),
            trigger: trigger.map(str::to_string),
        };
        let report =
            enrollments::enroll(&self.db, request, self.schedule(), self.clock.now()).await?;

        if report.is_duplicate() {
            let dup = FlotillaError::DuplicateEnrollment {
                sequence_id: sequence_id.to_string(),
                recipient: contact.phone.clone(),
            };
            debug!(contact_id = %contact.id, error = %dup, "enrollment absorbed");
        } else {
            metrics::record_enrollment();
            info!(
                contact_id = %contact.id,
                sequence_id = %sequence_id,
                planned = report.planned,
                inserted = report.inserted,
                visited = report.visited.len(),
                "contact enrolled"
            );
        }
        Ok(report)
    }

    /// Look the contact up, then [`enroll`](Self::enroll) it.
    pub async fn enroll_contact(
        &self,
        contact_id: &ContactId,
        sequence_id: &SequenceId,
        trigger: Option<&str>,
    ) -> Result<EnrollmentReport, FlotillaError> {
        let contact = contacts::get_contact(&self.db, contact_id)
            .await?
            .ok_or_else(|| FlotillaError::NotFound {
                entity: "contact",
                id: contact_id.to_string(),
            })?;
        self.enroll(&contact, sequence_id, trigger).await
    }

    /// Enroll every contact with a pending entry trigger, up to the batch limit.
    ///
    /// One contact failing never stops the batch.
    pub async fn process_triggers(&self) -> Result<TriggerBatchReport, FlotillaError> {
        let pending = contacts::pending_triggers(&self.db, self.config.batch_limit).await?;
        let mut report = TriggerBatchReport::default();

        for item in pending {
            match self
                .enroll(&item.contact, &item.sequence_id, Some(&item.label))
                .await
            {
                Ok(r) if r.is_duplicate() => report.duplicates += 1,
                Ok(_) => report.enrolled += 1,
                Err(e) if e.is_absorbed() => report.duplicates += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        contact_id = %item.contact.id,
                        sequence_id = %item.sequence_id,
                        error = %e,
                        "trigger enrollment failed"
                    );
                }
            }
        }

        if report != TriggerBatchReport::default() {
            info!(
                enrolled = report.enrolled,
                duplicates = report.duplicates,
                failed = report.failed,
                "processed sequence triggers"
            );
        }
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.trigger_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(policy = ?self.config.policy, "enrollment engine running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.process_triggers().await {
                        error!(error = %e, "trigger sweep failed");
                    }
                }
            }
        }
        info!("enrollment engine stopped");
    }
}

#[async_trait]
impl ProgressionHook for SequenceEnrollmentEngine {
    async fn on_step_sent(&self, message: &QueuedMessage) -> Result<(), FlotillaError> {
        let chain = self.config.policy == ProgressionPolicy::ChainActivation;
        let outcome =
            enrollments::advance(&self.db, message, self.schedule(), chain, self.clock.now())
                .await?;
        if outcome.completed {
            debug!(
                message_id = %message.id,
                recipient = %message.recipient,
                "enrollment completed"
            );
        }
        if let Some(next) = outcome.materialized {
            debug!(message_id = %message.id, next_id = %next, "queued next sequence step");
        }
        Ok(())
    }
}
