// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for CRUD operations on storage entities.

pub mod campaigns;
pub mod contacts;
pub mod devices;
pub mod enrollments;
pub mod locks;
pub mod messages;
pub mod sequences;
