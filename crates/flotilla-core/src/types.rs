// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by storage, the dispatch engine, and capability traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type!(
    /// Unique identifier for an outbound sending device.
    DeviceId
);
id_type!(
    /// Identifier of the tenant that owns devices, contacts, and broadcasts.
    UserId
);
id_type!(
    /// Unique identifier for a queued message row.
    MessageId
);
id_type!(
    /// Unique identifier for a campaign.
    CampaignId
);
id_type!(
    /// Unique identifier for a drip sequence.
    SequenceId
);
id_type!(
    /// Unique identifier for a step within a sequence.
    StepId
);
id_type!(
    /// Unique identifier for a contact record.
    ContactId
);
id_type!(
    /// Message id assigned by the transport after a successful send.
    ProviderMessageId
);

/// Health of a live transport handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Connected and authenticated.
    Healthy,
    /// Connected but not usable for sends.
    Degraded(String),
    /// Not connected.
    Unhealthy(String),
}

/// Status of a queued message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Queued,
    Processing,
    Sent,
    Failed,
    Skipped,
}

/// What moved a message from one status to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionCause {
    /// A worker claimed a due row.
    Claim,
    /// The claiming worker recorded the outcome of its attempt.
    Deliver,
    /// The reclaimer returned an abandoned claim to the queue.
    Reclaim,
    /// The reclaimer gave up on a row parked in an accelerator.
    Expire,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 6] = [
        MessageStatus::Pending,
        MessageStatus::Queued,
        MessageStatus::Processing,
        MessageStatus::Sent,
        MessageStatus::Failed,
        MessageStatus::Skipped,
    ];

    /// Terminal rows are never touched again; retries create new rows.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }

    /// The complete transition table for queue rows.
    pub fn can_transition(self, to: MessageStatus, cause: TransitionCause) -> bool {
        use MessageStatus::*;
        use TransitionCause::*;
        matches!(
            (self, to, cause),
            (Pending, Processing, Claim)
                | (Processing, Sent | Failed | Skipped, Deliver)
                | (Processing, Pending, Reclaim)
                | (Queued, Failed, Expire)
        )
    }
}

/// Connection status of a device as persisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Offline,
    Connecting,
    Online,
}

/// Aggregate status of a campaign, derived from its message counts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Triggered,
    Processing,
    Finished,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Derive the next status of a started campaign from its message counts.
    ///
    /// `Pending` campaigns have not been materialized yet and are returned as-is.
    pub fn derive(self, counts: &StatusCounts) -> CampaignStatus {
        if self == Self::Pending {
            return self;
        }
        if counts.total() == 0 {
            // Nothing was materialized for this audience.
            return if self == Self::Triggered {
                Self::Finished
            } else {
                self
            };
        }
        if counts.unfinished() > 0 {
            if self == Self::Triggered && counts.settled() == 0 {
                return Self::Triggered;
            }
            return Self::Processing;
        }
        if counts.sent > 0 {
            Self::Finished
        } else {
            Self::Failed
        }
    }
}

/// Kind of broadcast run guarded by the coordinator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BroadcastKind {
    Campaign,
    Sequence,
}

/// Progress of one contact through one sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
}

/// Per-status message counts for a scope (campaign, sequence, or user).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: MessageStatus, n: u64) {
        match status {
            MessageStatus::Pending => self.pending += n,
            MessageStatus::Queued => self.queued += n,
            MessageStatus::Processing => self.processing += n,
            MessageStatus::Sent => self.sent += n,
            MessageStatus::Failed => self.failed += n,
            MessageStatus::Skipped => self.skipped += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.unfinished() + self.settled()
    }

    /// Rows that may still produce a send.
    pub fn unfinished(&self) -> u64 {
        self.pending + self.queued + self.processing
    }

    /// Rows in a terminal status.
    pub fn settled(&self) -> u64 {
        self.sent + self.failed + self.skipped
    }
}

/// Optional min/max jitter bounds carried by campaigns, sequences, steps, and rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingOverride {
    pub min_delay_secs: Option<u32>,
    pub max_delay_secs: Option<u32>,
}

impl PacingOverride {
    pub fn new(min_delay_secs: Option<u32>, max_delay_secs: Option<u32>) -> Self {
        Self {
            min_delay_secs,
            max_delay_secs,
        }
    }

    /// Fill unset bounds from a less specific override.
    pub fn or(self, fallback: PacingOverride) -> PacingOverride {
        PacingOverride {
            min_delay_secs: self.min_delay_secs.or(fallback.min_delay_secs),
            max_delay_secs: self.max_delay_secs.or(fallback.max_delay_secs),
        }
    }
}

/// An outbound sending identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub user_id: UserId,
    pub name: String,
    pub status: DeviceStatus,
    /// Opaque reference to persisted transport credentials. `None` until paired.
    pub session_ref: Option<String>,
}

impl Device {
    pub fn has_credentials(&self) -> bool {
        self.session_ref.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A message recipient known to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub phone: String,
    pub name: String,
    pub niche: Option<String>,
    pub status: String,
    /// Pending trigger labels, in the order they were added.
    pub triggers: Vec<String>,
}

/// A one-shot broadcast to an audience filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub title: String,
    pub niche: Option<String>,
    pub target_status: Option<String>,
    pub template: String,
    pub media_url: Option<String>,
    pub pacing: PacingOverride,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A drip sequence definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub id: SequenceId,
    pub user_id: UserId,
    pub name: String,
    /// Label that enrolls a contact at this sequence's first step.
    pub entry_trigger: Option<String>,
    pub active: bool,
    pub pacing: PacingOverride,
}

/// One ordered stage of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    pub id: StepId,
    pub sequence_id: SequenceId,
    pub order_index: i64,
    pub template: String,
    pub media_url: Option<String>,
    /// Hours after the previous step. `None` falls back to the configured default.
    pub delay_hours: Option<i64>,
    /// Entry trigger of the sequence that follows this one, when set on the last step.
    pub next_trigger: Option<String>,
    pub pacing: PacingOverride,
}

/// A row to be inserted into the message queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub campaign_id: Option<CampaignId>,
    pub sequence_id: Option<SequenceId>,
    pub step_id: Option<StepId>,
    pub step_index: Option<i64>,
    pub recipient: String,
    pub recipient_name: String,
    pub template: String,
    pub media_url: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub pacing: PacingOverride,
}

/// A message queue row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub campaign_id: Option<CampaignId>,
    pub sequence_id: Option<SequenceId>,
    pub step_id: Option<StepId>,
    pub step_index: Option<i64>,
    pub recipient: String,
    pub recipient_name: String,
    pub template: String,
    pub media_url: Option<String>,
    pub status: MessageStatus,
    pub scheduled_at: DateTime<Utc>,
    pub pacing: PacingOverride,
    pub attempt: u32,
    pub retry_of: Option<MessageId>,
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub reclaim_count: u32,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// A row this worker owns until it writes a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedMessage {
    pub message: QueuedMessage,
    pub token: String,
}

/// Per-user broadcast lock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastLock {
    pub user_id: UserId,
    pub kind: BroadcastKind,
    pub broadcast_id: String,
    pub locked_at: DateTime<Utc>,
}

/// One contact's progress through one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub sequence_id: SequenceId,
    pub recipient: String,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub recipient_name: String,
    pub trigger_label: Option<String>,
    pub current_step: i64,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
}

/// Rendered content handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPayload {
    pub text: String,
    pub media_url: Option<String>,
}

/// Values a template renderer may substitute.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub recipient_name: &'a str,
    pub device_id: &'a DeviceId,
    pub recipient: &'a str,
}
