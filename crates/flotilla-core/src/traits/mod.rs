// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capabilities the engine consumes but does not implement.
//!
//! Transports and renderers are supplied by the embedding application and
//! use `#[async_trait]` where they perform I/O so they can be held as
//! `Arc<dyn ...>`.

pub mod renderer;
pub mod transport;

pub use renderer::{PlaceholderRenderer, TemplateRenderer};
pub use transport::{Transport, TransportConnector};
