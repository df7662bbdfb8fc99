// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for engine integration tests.
//!
//! `TestHarness` opens a temp SQLite database, pins time to a
//! [`ManualClock`], and wires a full [`Engine`] around a [`MockConnector`].
//! Seeding helpers write devices, contacts, campaigns, and sequences
//! directly through the storage layer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flotilla_config::FlotillaConfig;
use flotilla_core::types::{
    Campaign, Contact, Device, DeviceStatus, NewMessage, Sequence, SequenceStep,
};
use flotilla_core::{
    CampaignId, CampaignStatus, Clock, ContactId, DeviceId, FlotillaError, ManualClock, MessageId,
    PacingOverride, SequenceId, StepId, UserId,
};
use flotilla_engine::Engine;
use flotilla_storage::queries::{campaigns, contacts, devices, messages, sequences};
use flotilla_storage::Database;

use crate::mock_renderer::MockRenderer;
use crate::mock_transport::{MockConnector, SendLog};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: FlotillaConfig,
    send_delay: Duration,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = FlotillaConfig::default();
        config.dispatch.poll_interval_ms = 10;
        config.dispatch.max_concurrent_sends = 16;
        config.dispatch.drain_timeout_secs = 5;
        config.pacing.default_min_delay_secs = 0;
        config.pacing.default_max_delay_secs = 0;
        config.registry.connect_timeout_secs = 1;
        Self {
            config,
            send_delay: Duration::ZERO,
        }
    }

    /// Adjust the configuration before the engine is built.
    pub fn configure(mut self, f: impl FnOnce(&mut FlotillaConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Every mock send takes `delay`.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub async fn build(self) -> Result<TestHarness, FlotillaError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| FlotillaError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();

        let mut config = self.config;
        config.storage.database_path = db_path.clone();
        let db = Database::open(&db_path).await?;

        // Millisecond start so times read back from storage compare equal.
        let start = DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
            .unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        let connector = Arc::new(MockConnector::new().with_send_delay(self.send_delay));
        let renderer = Arc::new(MockRenderer::new());

        let engine = Engine::builder()
            .config(config)
            .database(db.clone())
            .connector(connector.clone())
            .renderer(renderer.clone())
            .clock(clock.clone())
            .build()?;

        Ok(TestHarness {
            engine,
            db,
            clock,
            connector,
            renderer,
            _temp_dir: temp_dir,
        })
    }
}

/// A wired engine over a temp database.
pub struct TestHarness {
    pub engine: Engine,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub connector: Arc<MockConnector>,
    pub renderer: Arc<MockRenderer>,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with the default test configuration.
    pub async fn new() -> Result<Self, FlotillaError> {
        Self::builder().build().await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }

    pub fn sends(&self) -> SendLog {
        self.connector.log()
    }

    /// Add a device. A paired device carries a session reference and can be
    /// restored by the registry.
    pub async fn add_device(
        &self,
        user_id: &str,
        device_id: &str,
        paired: bool,
        status: DeviceStatus,
    ) -> Result<Device, FlotillaError> {
        let device = Device {
            id: DeviceId::from(device_id),
            user_id: UserId::from(user_id),
            name: format!("device {device_id}"),
            status,
            session_ref: paired.then(|| format!("session-{device_id}")),
        };
        devices::upsert_device(&self.db, &device, self.now()).await?;
        Ok(device)
    }

    pub async fn add_contact(
        &self,
        user_id: &str,
        device_id: &str,
        contact_id: &str,
        phone: &str,
        triggers: &[&str],
    ) -> Result<Contact, FlotillaError> {
        let contact = Contact {
            id: ContactId::from(contact_id),
            user_id: UserId::from(user_id),
            device_id: DeviceId::from(device_id),
            phone: phone.to_string(),
            name: format!("Contact {contact_id}"),
            niche: None,
            status: "prospect".to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        };
        contacts::insert_contact(&self.db, &contact, self.now()).await?;
        Ok(contact)
    }

    /// Add a pending campaign to every `prospect` contact of the user, due now.
    pub async fn add_campaign(
        &self,
        user_id: &str,
        campaign_id: &str,
        template: &str,
    ) -> Result<Campaign, FlotillaError> {
        let campaign = Campaign {
            id: CampaignId::from(campaign_id),
            user_id: UserId::from(user_id),
            title: format!("campaign {campaign_id}"),
            niche: None,
            target_status: None,
            template: template.to_string(),
            media_url: None,
            pacing: PacingOverride::default(),
            status: CampaignStatus::Pending,
            scheduled_at: None,
            completed_at: None,
        };
        campaigns::insert_campaign(&self.db, &campaign, self.now()).await?;
        Ok(campaign)
    }

    /// Add an active sequence. Each step is `(delay_hours, next_trigger)`;
    /// step ids are `<sequence>-<index>`.
    pub async fn add_sequence(
        &self,
        user_id: &str,
        sequence_id: &str,
        entry_trigger: Option<&str>,
        steps: &[(Option<i64>, Option<&str>)],
    ) -> Result<Vec<SequenceStep>, FlotillaError> {
        let sequence = Sequence {
            id: SequenceId::from(sequence_id),
            user_id: UserId::from(user_id),
            name: format!("sequence {sequence_id}"),
            entry_trigger: entry_trigger.map(str::to_string),
            active: true,
            pacing: PacingOverride::default(),
        };
        sequences::insert_sequence(&self.db, &sequence, self.now()).await?;

        let mut out = Vec::with_capacity(steps.len());
        for (index, (delay_hours, next_trigger)) in steps.iter().enumerate() {
            let step = SequenceStep {
                id: StepId::from(format!("{sequence_id}-{index}")),
                sequence_id: sequence.id.clone(),
                order_index: index as i64,
                template: format!("{sequence_id} step {index} for {{name}}"),
                media_url: None,
                delay_hours: *delay_hours,
                next_trigger: next_trigger.map(str::to_string),
                pacing: PacingOverride::default(),
            };
            sequences::insert_step(&self.db, &step).await?;
            out.push(step);
        }
        Ok(out)
    }

    /// Queue a plain pending row for `recipient` on `device_id`, due now.
    pub async fn enqueue(
        &self,
        user_id: &str,
        device_id: &str,
        recipient: &str,
    ) -> Result<MessageId, FlotillaError> {
        let row = NewMessage {
            user_id: UserId::from(user_id),
            device_id: DeviceId::from(device_id),
            campaign_id: None,
            sequence_id: None,
            step_id: None,
            step_index: None,
            recipient: recipient.to_string(),
            recipient_name: recipient.to_string(),
            template: "hello {name}".to_string(),
            media_url: None,
            scheduled_at: self.now(),
            pacing: PacingOverride::default(),
        };
        messages::insert_message(&self.db, &row, self.now())
            .await?
            .ok_or_else(|| FlotillaError::Internal("row was not inserted".into()))
    }
}
