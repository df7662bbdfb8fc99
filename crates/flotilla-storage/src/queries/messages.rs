// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The message queue.
//!
//! Every status write here is compare-and-set on the current status, and on
//! the claim token once a row has been claimed. Rows in a terminal status
//! are never updated; retries insert new rows that point back with `retry_of`.

use chrono::{DateTime, Utc};
use flotilla_core::{CampaignId, DeviceId, FlotillaError, MessageId, SequenceId, StepId, UserId};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::database::{Database, map_tr_err};
use crate::models::{
    NewMessage, QueuedMessage, StatusCounts, enum_col, fmt_ts, opt_ts_col, pacing_cols, ts_col,
};

const MESSAGE_COLUMNS: &str = "id, user_id, device_id, campaign_id, sequence_id, step_id, \
     step_index, recipient, recipient_name, template, media_url, status, scheduled_at, \
     min_delay_secs, max_delay_secs, attempt, retry_of, claim_token, claimed_at, reclaim_count, \
     provider_message_id, error, sent_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<QueuedMessage, rusqlite::Error> {
    Ok(QueuedMessage {
        id: MessageId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        device_id: DeviceId(row.get(2)?),
        campaign_id: row.get::<_, Option<String>>(3)?.map(CampaignId),
        sequence_id: row.get::<_, Option<String>>(4)?.map(SequenceId),
        step_id: row.get::<_, Option<String>>(5)?.map(StepId),
        step_index: row.get(6)?,
        recipient: row.get(7)?,
        recipient_name: row.get(8)?,
        template: row.get(9)?,
        media_url: row.get(10)?,
        status: enum_col(row, 11)?,
        scheduled_at: ts_col(row, 12)?,
        pacing: pacing_cols(row, 13)?,
        attempt: row.get(15)?,
        retry_of: row.get::<_, Option<String>>(16)?.map(MessageId),
        claim_token: row.get(17)?,
        claimed_at: opt_ts_col(row, 18)?,
        reclaim_count: row.get(19)?,
        provider_message_id: row.get(20)?,
        error: row.get(21)?,
        sent_at: opt_ts_col(row, 22)?,
    })
}

/// Which rows an aggregate or retry applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    User(UserId),
    Campaign(CampaignId),
    Sequence(SequenceId),
    Messages(Vec<MessageId>),
}

impl Scope {
    /// SQL predicate over the `messages` table plus its bind values.
    fn predicate(&self) -> (String, Vec<String>) {
        match self {
            Scope::All => ("1 = 1".to_string(), Vec::new()),
            Scope::User(id) => ("user_id = ?".to_string(), vec![id.0.clone()]),
            Scope::Campaign(id) => ("campaign_id = ?".to_string(), vec![id.0.clone()]),
            Scope::Sequence(id) => ("sequence_id = ?".to_string(), vec![id.0.clone()]),
            Scope::Messages(ids) if ids.is_empty() => ("0 = 1".to_string(), Vec::new()),
            Scope::Messages(ids) => {
                let marks = vec!["?"; ids.len()].join(", ");
                (
                    format!("id IN ({marks})"),
                    ids.iter().map(|id| id.0.clone()).collect(),
                )
            }
        }
    }
}

/// Insert one row inside the caller's connection or transaction.
///
/// Returns the new id, or `None` when a uniqueness guard already holds an
/// equivalent row.
pub(crate) fn insert_message_row(
    conn: &Connection,
    msg: &NewMessage,
    now: &str,
) -> Result<Option<MessageId>, rusqlite::Error> {
    insert_row(conn, msg, now, 1, None)
}

fn insert_row(
    conn: &Connection,
    msg: &NewMessage,
    now: &str,
    attempt: u32,
    retry_of: Option<&str>,
) -> Result<Option<MessageId>, rusqlite::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO messages
            (id, user_id, device_id, campaign_id, sequence_id, step_id, step_index,
             recipient, recipient_name, template, media_url, status, scheduled_at,
             min_delay_secs, max_delay_secs, attempt, retry_of, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?13, ?14, ?15, ?16, ?17, ?17)
         ON CONFLICT DO NOTHING",
    )?;
    let changed = stmt.execute(params![
        id,
        msg.user_id.as_str(),
        msg.device_id.as_str(),
        msg.campaign_id.as_ref().map(|c| c.as_str()),
        msg.sequence_id.as_ref().map(|s| s.as_str()),
        msg.step_id.as_ref().map(|s| s.as_str()),
        msg.step_index,
        msg.recipient,
        msg.recipient_name,
        msg.template,
        msg.media_url,
        fmt_ts(msg.scheduled_at),
        msg.pacing.min_delay_secs,
        msg.pacing.max_delay_secs,
        attempt,
        retry_of,
        now,
    ])?;
    Ok((changed == 1).then(|| MessageId(id)))
}

/// Insert a pending row. Returns `None` if it duplicates an existing first attempt.
pub async fn insert_message(
    db: &Database,
    msg: &NewMessage,
    now: DateTime<Utc>,
) -> Result<Option<MessageId>, FlotillaError> {
    let msg = msg.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| insert_message_row(conn, &msg, &now))
        .await
        .map_err(map_tr_err)
}

/// Insert many pending rows in one transaction. Returns how many were new.
pub async fn insert_messages(
    db: &Database,
    rows: Vec<NewMessage>,
    now: DateTime<Utc>,
) -> Result<usize, FlotillaError> {
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for row in &rows {
                if insert_message_row(&tx, row, &now)?.is_some() {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(map_tr_err)
}

/// Look up one row.
pub async fn get_message(
    db: &Database,
    id: &MessageId,
) -> Result<Option<QueuedMessage>, FlotillaError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Rows in scope ordered by `scheduled_at`.
pub async fn list_messages(
    db: &Database,
    scope: Scope,
) -> Result<Vec<QueuedMessage>, FlotillaError> {
    let (predicate, values) = scope.predicate();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {predicate}
                 ORDER BY scheduled_at, created_at, id"
            ))?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_message)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Due pending rows, at most one per device: each device's earliest row.
///
/// Ordered by `scheduled_at` and capped at `limit`.
pub async fn fetch_due(
    db: &Database,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<QueuedMessage>, FlotillaError> {
    let now = fmt_ts(now);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                    SELECT *, ROW_NUMBER() OVER (
                        PARTITION BY device_id ORDER BY scheduled_at, created_at, id
                    ) AS device_rank
                    FROM messages
                    WHERE status = 'pending' AND scheduled_at <= ?1
                 )
                 WHERE device_rank = 1
                 ORDER BY scheduled_at, created_at, id
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit], row_to_message)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically move a pending row to processing under `token`.
///
/// Returns `None` when another claimant got there first.
pub async fn claim(
    db: &Database,
    id: &MessageId,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<QueuedMessage>, FlotillaError> {
    let id = id.0.clone();
    let token = token.to_string();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "UPDATE messages
                     SET status = 'processing', claim_token = ?1, claimed_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND status = 'pending'
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                params![token, now, id],
                row_to_message,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Confirm `token` still owns a processing row and restart its claim clock.
///
/// False when the row was reclaimed or finished under another claim.
pub async fn renew_claim(
    db: &Database,
    id: &MessageId,
    token: &str,
    now: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    let id = id.0.clone();
    let token = token.to_string();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET claimed_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status = 'processing' AND claim_token = ?3",
                params![now, id, token],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Record a successful send. False if the claim was lost.
pub async fn mark_sent(
    db: &Database,
    id: &MessageId,
    token: &str,
    provider_message_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    let id = id.0.clone();
    let token = token.to_string();
    let provider_message_id = provider_message_id.to_string();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages
                 SET status = 'sent', provider_message_id = ?1, sent_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = 'processing' AND claim_token = ?4",
                params![provider_message_id, now, id, token],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed send attempt. False if the claim was lost.
pub async fn mark_failed(
    db: &Database,
    id: &MessageId,
    token: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    finish_with_error(db, id, token, "failed", error, now).await
}

/// Record that the row was claimed but its device could not be used. False if the claim was lost.
pub async fn mark_skipped(
    db: &Database,
    id: &MessageId,
    token: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    finish_with_error(db, id, token, "skipped", reason, now).await
}

async fn finish_with_error(
    db: &Database,
    id: &MessageId,
    token: &str,
    status: &'static str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    let id = id.0.clone();
    let token = token.to_string();
    let error = error.to_string();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?1, error = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'processing' AND claim_token = ?5",
                params![status, error, now, id, token],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Queue a fresh attempt for every failed row in scope that has not been retried.
///
/// The failed rows stay terminal. Each new row is `pending`, due at `now`,
/// with `attempt + 1` and `retry_of` pointing at the failed row.
pub async fn retry_failed(
    db: &Database,
    scope: Scope,
    now: DateTime<Utc>,
) -> Result<usize, FlotillaError> {
    let (predicate, values) = scope.predicate();
    let now_s = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let failed = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages f
                     WHERE status = 'failed' AND {predicate}
                       AND NOT EXISTS (SELECT 1 FROM messages r WHERE r.retry_of = f.id)
                     ORDER BY scheduled_at, id"
                ))?;
                let rows = stmt.query_map(params_from_iter(values.iter()), row_to_message)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let mut inserted = 0;
            for old in &failed {
                let fresh = NewMessage {
                    user_id: old.user_id.clone(),
                    device_id: old.device_id.clone(),
                    campaign_id: old.campaign_id.clone(),
                    sequence_id: old.sequence_id.clone(),
                    step_id: old.step_id.clone(),
                    step_index: old.step_index,
                    recipient: old.recipient.clone(),
                    recipient_name: old.recipient_name.clone(),
                    template: old.template.clone(),
                    media_url: old.media_url.clone(),
                    scheduled_at: now,
                    pacing: old.pacing,
                };
                let attempt = old.attempt.saturating_add(1);
                if insert_row(&tx, &fresh, &now_s, attempt, Some(old.id.as_str()))?.is_some() {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(map_tr_err)
}

/// Per-status counts for a scope.
pub async fn counts(db: &Database, scope: Scope) -> Result<StatusCounts, FlotillaError> {
    let (predicate, values) = scope.predicate();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT status, COUNT(*) FROM messages WHERE {predicate} GROUP BY status"
            ))?;
            let mut counts = StatusCounts::default();
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            while let Some(row) = rows.next()? {
                let status = enum_col(row, 0)?;
                let n: i64 = row.get(1)?;
                counts.add(status, n as u64);
            }
            Ok(counts)
        })
        .await
        .map_err(map_tr_err)
}

/// Return abandoned claims to the queue.
///
/// Rows `processing` since before `cutoff` go back to `pending` with their
/// claim cleared and `reclaim_count` bumped. Returns the number reverted.
pub async fn reclaim_stuck_processing(
    db: &Database,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<usize, FlotillaError> {
    let cutoff = fmt_ts(cutoff);
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages
                 SET status = 'pending', claim_token = NULL, claimed_at = NULL,
                     reclaim_count = reclaim_count + 1, updated_at = ?1
                 WHERE status = 'processing' AND claimed_at < ?2",
                params![now, cutoff],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Fail rows parked in `queued` since before `cutoff`.
///
/// `reason` renders the error text stored on each expired row.
pub async fn expire_stale_queued<F>(
    db: &Database,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    reason: F,
) -> Result<usize, FlotillaError>
where
    F: Fn(&MessageId) -> String + Send + 'static,
{
    let cutoff = fmt_ts(cutoff);
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let stale = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages WHERE status = 'queued' AND updated_at < ?1",
                )?;
                let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let mut expired = 0;
            for id in stale {
                let error = reason(&MessageId(id.clone()));
                expired += tx.execute(
                    "UPDATE messages SET status = 'failed', error = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = 'queued' AND updated_at < ?4",
                    params![error, now, id, cutoff],
                )?;
            }
            tx.commit()?;
            Ok(expired)
        })
        .await
        .map_err(map_tr_err)
}

/// Sequence rows of a user that are sending now: claimed, or pending and already due.
pub async fn count_sequence_sending(
    db: &Database,
    user_id: &UserId,
    now: DateTime<Utc>,
) -> Result<u64, FlotillaError> {
    let user_id = user_id.0.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE user_id = ?1 AND sequence_id IS NOT NULL
                   AND (status = 'processing' OR (status = 'pending' AND scheduled_at <= ?2))",
                params![user_id, now],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as u64)
        .map_err(map_tr_err)
}

/// Most recent `sent_at` among a user's sequence messages.
pub async fn last_sequence_sent_at(
    db: &Database,
    user_id: &UserId,
) -> Result<Option<DateTime<Utc>>, FlotillaError> {
    let user_id = user_id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT MAX(sent_at) FROM messages
                 WHERE user_id = ?1 AND sequence_id IS NOT NULL AND status = 'sent'",
                params![user_id],
                |row| opt_ts_col(row, 0),
            )
        })
        .await
        .map_err(map_tr_err)
}
