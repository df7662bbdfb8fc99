// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Flotilla integration tests.
//!
//! Provides mock capabilities and a harness for fast, deterministic tests
//! that need no real messaging transport.
//!
//! # Components
//!
//! - [`MockConnector`] / [`MockTransport`] - scripted device sessions with send capture
//! - [`MockRenderer`] - placeholder rendering with call capture
//! - [`TestHarness`] - temp database, pinned clock, and a wired engine

pub mod harness;
pub mod mock_renderer;
pub mod mock_transport;

pub use harness::TestHarness;
pub use mock_renderer::MockRenderer;
pub use mock_transport::{MockConnector, MockTransport, RestoreBehavior, SendLog, SendRecord};
