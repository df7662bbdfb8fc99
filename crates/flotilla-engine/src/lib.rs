// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast delivery and sequencing engine.
//!
//! Messages live in the SQLite queue as rows. The [`DispatchWorkerPool`]
//! claims due rows, resolves a live transport through the
//! [`ConnectionRegistry`], waits its turn at the device's [`DispatchGate`],
//! and records the outcome. Around it:
//!
//! - [`SequenceEnrollmentEngine`] turns enrollments into scheduled rows and
//!   advances them as steps go out.
//! - [`CampaignDispatcher`] materializes campaign audiences and tracks
//!   campaign status.
//! - [`BroadcastCoordinator`] decides whether a user may start a broadcast.
//! - [`StuckMessageReclaimer`] returns abandoned claims to the queue.
//!
//! [`Engine`] wires them together and runs their loops in a [`TaskGroup`].

pub mod campaign;
pub mod coordinator;
pub mod engine;
pub mod enrollment;
mod metrics;
pub mod pool;
pub mod reclaimer;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

pub use campaign::{CampaignDispatcher, TriggerOutcome};
pub use coordinator::{BroadcastCoordinator, DenyReason, StartDecision};
pub use engine::{Engine, EngineBuilder};
pub use enrollment::{SequenceEnrollmentEngine, TriggerBatchReport};
pub use pool::{DeliveryOutcome, DispatchWorkerPool, ProgressionHook};
pub use reclaimer::{ReclaimReport, StuckMessageReclaimer};
pub use registry::ConnectionRegistry;
pub use scheduler::{DispatchGate, DispatchPermit, Pacing};
pub use supervisor::{install_signal_handler, TaskGroup};

/// A whole-second span as a chrono duration, capped far beyond any configured value.
pub(crate) fn span_secs(secs: u64) -> chrono::Duration {
    const CAP: u64 = 1_000_000_000_000;
    chrono::Duration::seconds(secs.min(CAP) as i64)
}
