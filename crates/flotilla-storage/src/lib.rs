// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Flotilla dispatch engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and typed operations for devices,
//! contacts, campaigns, sequences, enrollments, broadcast locks, and the
//! message queue.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::*;
pub use queries::enrollments::{AdvanceOutcome, EnrollRequest, EnrollmentReport};
pub use queries::messages::Scope;
