// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `flotilla-core::types` so the engine
//! and the capability traits share them. This module re-exports them and
//! holds the column conversions used by the query modules.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

pub use flotilla_core::types::{
    BroadcastKind, BroadcastLock, Campaign, CampaignStatus, Contact, Device, DeviceStatus,
    Enrollment, EnrollmentStatus, MessageStatus, NewMessage, PacingOverride, QueuedMessage,
    Sequence, SequenceStep, StatusCounts,
};

/// Render a timestamp the way every column stores it: RFC 3339, millis, `Z`.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn fmt_opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

/// Read a strum-backed enum column.
pub(crate) fn enum_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn pacing_cols(
    row: &rusqlite::Row<'_>,
    min_idx: usize,
) -> Result<PacingOverride, rusqlite::Error> {
    Ok(PacingOverride::new(row.get(min_idx)?, row.get(min_idx + 1)?))
}

/// Comma-separated trigger column to an ordered label list.
pub(crate) fn split_triggers(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inverse of [`split_triggers`]; an empty list is stored as NULL.
pub(crate) fn join_triggers(labels: &[String]) -> Option<String> {
    if labels.is_empty() {
        None
    } else {
        Some(labels.join(","))
    }
}
