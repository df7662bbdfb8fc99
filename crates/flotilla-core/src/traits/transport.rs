// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound transport client traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Device, HealthStatus, OutboundPayload, ProviderMessageId};

/// A live session for one device.
///
/// Implementations wrap an external messaging-protocol client. The engine
/// never sends on a handle concurrently for the same device.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the connection using the handle's stored session.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection. Errors are swallowed by the implementation.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_authenticated(&self) -> bool;

    /// Deliver one payload to a recipient.
    async fn send(
        &self,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<ProviderMessageId, TransportError>;

    /// Healthy only when both connected and authenticated.
    fn health(&self) -> HealthStatus {
        if !self.is_connected() {
            HealthStatus::Unhealthy("not connected".into())
        } else if !self.is_authenticated() {
            HealthStatus::Degraded("not authenticated".into())
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Restores device sessions from persisted credentials.
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Rebuild and connect a transport for `device`.
    ///
    /// Called only for devices that carry a session reference. Returns
    /// [`TransportError::AuthRequired`] when the stored session is rejected.
    async fn restore(&self, device: &Device) -> Result<Arc<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        connected: bool,
        authenticated: bool,
    }

    #[async_trait]
    impl Transport for Fixed {
        async fn connect(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }
        async fn send(
            &self,
            _recipient: &str,
            _payload: &OutboundPayload,
        ) -> Result<ProviderMessageId, TransportError> {
            Ok(ProviderMessageId("x".into()))
        }
    }

    #[test]
    fn health_requires_connection_and_auth() {
        let ok = Fixed {
            connected: true,
            authenticated: true,
        };
        assert_eq!(ok.health(), HealthStatus::Healthy);

        let unauth = Fixed {
            connected: true,
            authenticated: false,
        };
        assert!(matches!(unauth.health(), HealthStatus::Degraded(_)));

        let down = Fixed {
            connected: false,
            authenticated: true,
        };
        assert!(matches!(down.health(), HealthStatus::Unhealthy(_)));
    }

    #[test]
    fn transport_is_object_safe() {
        fn _assert(_: &dyn Transport) {}
        fn _assert_connector(_: &dyn TransportConnector) {}
    }
}
