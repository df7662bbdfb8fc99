// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Flotilla dispatch engine.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across Flotilla components and storage operations.
#[derive(Debug, Error)]
pub enum FlotillaError {
    /// No live handle is registered for the device and none can be restored.
    #[error("device {device_id} is unavailable")]
    DeviceUnavailable { device_id: String },

    /// The device's persisted session was rejected; it needs to be paired again.
    #[error("device {device_id} requires re-pairing")]
    DeviceAuthRequired { device_id: String },

    /// Transient failure while restoring a device session.
    #[error("failed to connect device {device_id}: {message}")]
    ConnectFailed { device_id: String, message: String },

    /// The transport rejected a send.
    #[error("send failed: {message}")]
    SendFailed { message: String },

    /// The (sequence, recipient) pair is already enrolled.
    ///
    /// Callers absorb this; it never marks a batch as failed.
    #[error("{recipient} is already enrolled in sequence {sequence_id}")]
    DuplicateEnrollment {
        sequence_id: String,
        recipient: String,
    },

    /// The broadcast coordinator refused to start a run.
    #[error("schedule conflict: {reason}")]
    ScheduleConflict { reason: String },

    /// A message was abandoned before reaching the transport.
    #[error("message {message_id} abandoned after {waited:?} without being sent")]
    ReclaimTimeout { message_id: String, waited: Duration },

    /// Configuration errors (invalid values, missing collaborators).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FlotillaError {
    /// Whether retrying the same operation later may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::Timeout { .. } | Self::Storage { .. }
        )
    }

    /// Whether the error is an idempotency hit that callers swallow.
    pub fn is_absorbed(&self) -> bool {
        matches!(self, Self::DuplicateEnrollment { .. })
    }
}

/// Errors reported by an external transport client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Stored credentials are no longer accepted.
    #[error("authentication required")]
    AuthRequired,

    /// Could not establish or restore the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The remote side refused the message.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The handle was closed underneath the caller.
    #[error("connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let connect = FlotillaError::ConnectFailed {
            device_id: "d1".into(),
            message: "reset".into(),
        };
        assert!(connect.is_transient());

        let auth = FlotillaError::DeviceAuthRequired {
            device_id: "d1".into(),
        };
        assert!(!auth.is_transient());

        let storage = FlotillaError::Storage {
            source: Box::new(std::io::Error::other("disk")),
        };
        assert!(storage.is_transient());
    }

    #[test]
    fn duplicate_enrollment_is_absorbed() {
        let dup = FlotillaError::DuplicateEnrollment {
            sequence_id: "s1".into(),
            recipient: "+15550001".into(),
        };
        assert!(dup.is_absorbed());
        assert!(!FlotillaError::Internal("x".into()).is_absorbed());
    }

    #[test]
    fn reclaim_timeout_message_names_the_row() {
        let err = FlotillaError::ReclaimTimeout {
            message_id: "m-42".into(),
            waited: Duration::from_secs(12 * 3600),
        };
        let text = err.to_string();
        assert!(text.contains("m-42"));
        assert!(text.contains("abandoned"));
    }
}
