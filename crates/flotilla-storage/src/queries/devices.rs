// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device rows: the pairing flow writes them, the registry flips their status.

use chrono::{DateTime, Utc};
use flotilla_core::{DeviceId, FlotillaError, UserId};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{Device, DeviceStatus, enum_col, fmt_ts};

const DEVICE_COLUMNS: &str = "id, user_id, name, status, session_ref";

fn row_to_device(row: &rusqlite::Row<'_>) -> Result<Device, rusqlite::Error> {
    Ok(Device {
        id: DeviceId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        name: row.get(2)?,
        status: enum_col(row, 3)?,
        session_ref: row.get(4)?,
    })
}

/// Insert or update a device row.
pub async fn upsert_device(
    db: &Database,
    device: &Device,
    now: DateTime<Utc>,
) -> Result<(), FlotillaError> {
    let device = device.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO devices (id, user_id, name, status, session_ref, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    name = excluded.name,
                    status = excluded.status,
                    session_ref = excluded.session_ref,
                    updated_at = excluded.updated_at",
                params![
                    device.id.as_str(),
                    device.user_id.as_str(),
                    device.name,
                    device.status.as_ref(),
                    device.session_ref,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Look up a device by id.
pub async fn get_device(db: &Database, id: &DeviceId) -> Result<Option<Device>, FlotillaError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
                params![id],
                row_to_device,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Record a connection status change.
pub async fn set_device_status(
    db: &Database,
    id: &DeviceId,
    status: DeviceStatus,
    now: DateTime<Utc>,
) -> Result<(), FlotillaError> {
    let id = id.0.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE devices SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_ref(), now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Devices of a user with the given status, ordered by id.
pub async fn list_devices_with_status(
    db: &Database,
    user_id: &UserId,
    status: DeviceStatus,
) -> Result<Vec<Device>, FlotillaError> {
    let user_id = user_id.0.clone();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DEVICE_COLUMNS} FROM devices
                 WHERE user_id = ?1 AND status = ?2 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![user_id, status.as_ref()], row_to_device)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Number of online devices a user has.
pub async fn count_online(db: &Database, user_id: &UserId) -> Result<u64, FlotillaError> {
    let user_id = user_id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM devices WHERE user_id = ?1 AND status = 'online'",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as u64)
        .map_err(map_tr_err)
}
