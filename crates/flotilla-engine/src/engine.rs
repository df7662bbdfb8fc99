// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring of the engine components.

use std::sync::Arc;
use std::time::Duration;

use flotilla_config::FlotillaConfig;
use flotilla_core::{Clock, FlotillaError, SystemClock, TemplateRenderer, TransportConnector};
use flotilla_storage::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::campaign::CampaignDispatcher;
use crate::coordinator::BroadcastCoordinator;
use crate::enrollment::SequenceEnrollmentEngine;
use crate::pool::{DispatchWorkerPool, ProgressionHook};
use crate::reclaimer::StuckMessageReclaimer;
use crate::registry::ConnectionRegistry;
use crate::scheduler::DispatchGate;
use crate::supervisor::TaskGroup;

/// Extra time granted on shutdown beyond the pool's own drain timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collects the engine's collaborators. Every piece except the clock is required.
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<FlotillaConfig>,
    db: Option<Database>,
    connector: Option<Arc<dyn TransportConnector>>,
    renderer: Option<Arc<dyn TemplateRenderer>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: FlotillaConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Engine, FlotillaError> {
        let missing = |what: &str| FlotillaError::Config(format!("engine requires a {what}"));
        let config = self.config.ok_or_else(|| missing("configuration"))?;
        let db = self.db.ok_or_else(|| missing("database"))?;
        let connector = self.connector.ok_or_else(|| missing("transport connector"))?;
        let renderer = self.renderer.ok_or_else(|| missing("template renderer"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let registry = Arc::new(ConnectionRegistry::new(
            db.clone(),
            connector,
            clock.clone(),
            config.registry.connect_timeout(),
        ));
        let gate = Arc::new(DispatchGate::new());
        let enrollment = Arc::new(SequenceEnrollmentEngine::new(
            db.clone(),
            clock.clone(),
            config.enrollment.clone(),
        ));
        let hook: Arc<dyn ProgressionHook> = enrollment.clone();
        let pool = Arc::new(DispatchWorkerPool::new(
            db.clone(),
            registry.clone(),
            gate.clone(),
            renderer,
            Some(hook),
            clock.clone(),
            config.dispatch.clone(),
            config.pacing.clone(),
        ));
        let coordinator = Arc::new(BroadcastCoordinator::new(
            db.clone(),
            clock.clone(),
            config.coordinator.clone(),
        ));
        let reclaimer = Arc::new(StuckMessageReclaimer::new(
            db.clone(),
            clock.clone(),
            config.reclaim.clone(),
        ));
        let campaigns = Arc::new(CampaignDispatcher::new(
            db.clone(),
            coordinator.clone(),
            clock.clone(),
            config.campaign.clone(),
        ));

        Ok(Engine {
            config,
            db,
            clock,
            registry,
            gate,
            pool,
            enrollment,
            coordinator,
            reclaimer,
            campaigns,
        })
    }
}

/// The assembled dispatch engine.
pub struct Engine {
    config: FlotillaConfig,
    db: Database,
    clock: Arc<dyn Clock>,
    registry: Arc<ConnectionRegistry>,
    gate: Arc<DispatchGate>,
    pool: Arc<DispatchWorkerPool>,
    enrollment: Arc<SequenceEnrollmentEngine>,
    coordinator: Arc<BroadcastCoordinator>,
    reclaimer: Arc<StuckMessageReclaimer>,
    campaigns: Arc<CampaignDispatcher>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &FlotillaConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<DispatchGate> {
        &self.gate
    }

    pub fn pool(&self) -> &Arc<DispatchWorkerPool> {
        &self.pool
    }

    pub fn enrollment(&self) -> &Arc<SequenceEnrollmentEngine> {
        &self.enrollment
    }

    pub fn coordinator(&self) -> &Arc<BroadcastCoordinator> {
        &self.coordinator
    }

    pub fn reclaimer(&self) -> &Arc<StuckMessageReclaimer> {
        &self.reclaimer
    }

    pub fn campaigns(&self) -> &Arc<CampaignDispatcher> {
        &self.campaigns
    }

    /// Spawn every background loop under `cancel`.
    pub fn start(&self, cancel: CancellationToken) -> TaskGroup {
        let mut group = TaskGroup::new(cancel);
        group.spawn("dispatch", self.pool.clone().run(group.token()));
        group.spawn("reclaimer", self.reclaimer.clone().run(group.token()));
        group.spawn("enrollment", self.enrollment.clone().run(group.token()));
        group.spawn("coordinator", self.coordinator.clone().run(group.token()));
        group.spawn("campaigns", self.campaigns.clone().run(group.token()));
        info!(
            name = self.config.engine.name.as_str(),
            tasks = group.len(),
            "engine started"
        );
        group
    }

    /// Stop the loops, then disconnect every device.
    pub async fn shutdown(&self, group: TaskGroup) {
        let timeout = self.config.dispatch.drain_timeout() + SHUTDOWN_GRACE;
        let aborted = group.shutdown(timeout).await;
        self.registry.disconnect_all().await;
        info!(aborted = aborted.len(), "engine stopped");
    }
}
