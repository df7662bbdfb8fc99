// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact rows, campaign audiences, and pending trigger labels.

use chrono::{DateTime, Utc};
use flotilla_core::{ContactId, DeviceId, FlotillaError, SequenceId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{Contact, fmt_ts, join_triggers, split_triggers};

const CONTACT_COLUMNS: &str = "id, user_id, device_id, phone, name, niche, status, triggers";

fn row_to_contact(row: &rusqlite::Row<'_>) -> Result<Contact, rusqlite::Error> {
    let triggers: Option<String> = row.get(7)?;
    Ok(Contact {
        id: ContactId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        device_id: DeviceId(row.get(2)?),
        phone: row.get(3)?,
        name: row.get(4)?,
        niche: row.get(5)?,
        status: row.get(6)?,
        triggers: split_triggers(triggers.as_deref()),
    })
}

/// A contact waiting to enter the sequence its trigger label names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTrigger {
    pub contact: Contact,
    pub sequence_id: SequenceId,
    pub label: String,
}

/// Insert a contact. Existing `(user_id, phone)` pairs are left untouched.
pub async fn insert_contact(
    db: &Database,
    contact: &Contact,
    now: DateTime<Utc>,
) -> Result<(), FlotillaError> {
    let contact = contact.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO contacts
                    (id, user_id, device_id, phone, name, niche, status, triggers, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT DO NOTHING",
                params![
                    contact.id.as_str(),
                    contact.user_id.as_str(),
                    contact.device_id.as_str(),
                    contact.phone,
                    contact.name,
                    contact.niche,
                    contact.status,
                    join_triggers(&contact.triggers),
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Look up a contact by id.
pub async fn get_contact(db: &Database, id: &ContactId) -> Result<Option<Contact>, FlotillaError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Append a trigger label to a contact unless it is already present.
pub async fn add_trigger(
    db: &Database,
    id: &ContactId,
    label: &str,
    now: DateTime<Utc>,
) -> Result<(), FlotillaError> {
    let id = id.0.clone();
    let label = label.trim().to_string();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let raw: Option<Option<String>> = tx
                .query_row(
                    "SELECT triggers FROM contacts WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(raw) = raw {
                let mut labels = split_triggers(raw.as_deref());
                if !labels.contains(&label) {
                    labels.push(label);
                    tx.execute(
                        "UPDATE contacts SET triggers = ?1, updated_at = ?2 WHERE id = ?3",
                        params![join_triggers(&labels), now, id],
                    )?;
                }
            }
            tx.commit()
        })
        .await
        .map_err(map_tr_err)
}

/// Remove one trigger label from a contact. Runs inside the caller's transaction.
///
/// Returns whether the label was present.
pub(crate) fn remove_trigger(
    conn: &Connection,
    id: &str,
    label: &str,
    now: &str,
) -> Result<bool, rusqlite::Error> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT triggers FROM contacts WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(false);
    };
    let mut labels = split_triggers(raw.as_deref());
    let before = labels.len();
    labels.retain(|l| l != label);
    if labels.len() == before {
        return Ok(false);
    }
    conn.execute(
        "UPDATE contacts SET triggers = ?1, updated_at = ?2 WHERE id = ?3",
        params![join_triggers(&labels), now, id],
    )?;
    Ok(true)
}

/// Campaign audience: a user's contacts filtered by niche and status, ordered by id.
pub async fn audience(
    db: &Database,
    user_id: &UserId,
    niche: Option<&str>,
    status: &str,
) -> Result<Vec<Contact>, FlotillaError> {
    let user_id = user_id.0.clone();
    let niche = niche.map(str::to_string);
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 WHERE user_id = ?1 AND status = ?2 AND (?3 IS NULL OR niche = ?3)
                 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![user_id, status, niche], row_to_contact)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Contacts carrying a label that is the entry trigger of an active sequence
/// they are not enrolled in yet. At most one entry per contact, up to `limit`.
///
/// Labels are matched in the order the contact carries them; for a label
/// shared by several sequences the oldest unenrolled one wins.
pub async fn pending_triggers(
    db: &Database,
    limit: usize,
) -> Result<Vec<PendingTrigger>, FlotillaError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {CONTACT_COLUMNS}, label, sequence_id FROM (
                    SELECT c.*, s.entry_trigger AS label, s.id AS sequence_id,
                           ROW_NUMBER() OVER (
                               PARTITION BY c.id
                               ORDER BY instr(',' || c.triggers || ',', ',' || s.entry_trigger || ','),
                                        s.created_at, s.id
                           ) AS pick
                    FROM contacts c
                    JOIN sequences s
                      ON s.user_id = c.user_id
                     AND s.active = 1
                     AND s.entry_trigger IS NOT NULL AND s.entry_trigger != ''
                     AND instr(',' || c.triggers || ',', ',' || s.entry_trigger || ',') > 0
                    WHERE c.triggers IS NOT NULL AND c.triggers != ''
                      AND NOT EXISTS (
                          SELECT 1 FROM enrollments e
                          WHERE e.sequence_id = s.id AND e.recipient = c.phone
                      )
                 )
                 WHERE pick = 1
                 ORDER BY updated_at, id
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(PendingTrigger {
                    contact: row_to_contact(row)?,
                    label: row.get(8)?,
                    sequence_id: SequenceId(row.get(9)?),
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
