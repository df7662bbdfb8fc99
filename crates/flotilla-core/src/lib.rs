// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Flotilla dispatch engine.
//!
//! This crate provides the error taxonomy, domain types, and the traits for
//! the external capabilities the engine consumes (transport clients and
//! template renderers). It also holds the pure sequence graph walk shared by
//! storage and the enrollment engine.

pub mod clock;
pub mod error;
pub mod sequence;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FlotillaError, TransportError};
pub use types::{
    BroadcastKind, CampaignId, CampaignStatus, ClaimedMessage, ContactId, DeviceId, DeviceStatus,
    HealthStatus, MessageId, MessageStatus, PacingOverride, SequenceId, StatusCounts, StepId,
    TransitionCause, UserId,
};

pub use traits::{PlaceholderRenderer, TemplateRenderer, Transport, TransportConnector};
