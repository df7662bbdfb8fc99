// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence and step definitions.

use chrono::{DateTime, Utc};
use flotilla_core::sequence::StepSource;
use flotilla_core::{FlotillaError, SequenceId, StepId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{Sequence, SequenceStep, fmt_ts, pacing_cols};

fn row_to_sequence(row: &rusqlite::Row<'_>) -> Result<Sequence, rusqlite::Error> {
    Ok(Sequence {
        id: SequenceId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        name: row.get(2)?,
        entry_trigger: row.get(3)?,
        active: row.get(4)?,
        pacing: pacing_cols(row, 5)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> Result<SequenceStep, rusqlite::Error> {
    Ok(SequenceStep {
        id: StepId(row.get(0)?),
        sequence_id: SequenceId(row.get(1)?),
        order_index: row.get(2)?,
        template: row.get(3)?,
        media_url: row.get(4)?,
        delay_hours: row.get(5)?,
        next_trigger: row.get(6)?,
        pacing: pacing_cols(row, 7)?,
    })
}

pub(crate) fn load_sequence(
    conn: &Connection,
    id: &str,
) -> Result<Option<Sequence>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, user_id, name, entry_trigger, active, min_delay_secs, max_delay_secs
         FROM sequences WHERE id = ?1",
        params![id],
        row_to_sequence,
    )
    .optional()
}

pub(crate) fn load_steps(conn: &Connection, id: &str) -> Result<Vec<SequenceStep>, rusqlite::Error> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, sequence_id, order_index, template, media_url, delay_hours, next_trigger,
                min_delay_secs, max_delay_secs
         FROM sequence_steps WHERE sequence_id = ?1 ORDER BY order_index",
    )?;
    let rows = stmt.query_map(params![id], row_to_step)?;
    rows.collect()
}

/// Active sequence of `user_id` whose entry trigger is `label`.
///
/// Several sequences may share a label; the oldest wins.
pub(crate) fn find_by_trigger(
    conn: &Connection,
    user_id: &str,
    label: &str,
) -> Result<Option<SequenceId>, rusqlite::Error> {
    conn.query_row(
        "SELECT id FROM sequences
         WHERE user_id = ?1 AND entry_trigger = ?2 AND active = 1
         ORDER BY created_at, id LIMIT 1",
        params![user_id, label],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|id| id.map(SequenceId))
}

/// [`StepSource`] over an open connection or transaction, scoped to one user.
pub(crate) struct ConnSource<'a> {
    pub conn: &'a Connection,
    pub user_id: &'a str,
}

impl StepSource for ConnSource<'_> {
    type Error = rusqlite::Error;

    fn sequence(&mut self, id: &SequenceId) -> Result<Option<Sequence>, Self::Error> {
        load_sequence(self.conn, id.as_str())
    }

    fn steps(&mut self, id: &SequenceId) -> Result<Vec<SequenceStep>, Self::Error> {
        load_steps(self.conn, id.as_str())
    }

    fn resolve_trigger(&mut self, label: &str) -> Result<Option<SequenceId>, Self::Error> {
        find_by_trigger(self.conn, self.user_id, label)
    }
}

/// Insert a sequence definition.
pub async fn insert_sequence(
    db: &Database,
    sequence: &Sequence,
    now: DateTime<Utc>,
) -> Result<(), FlotillaError> {
    let s = sequence.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sequences
                    (id, user_id, name, entry_trigger, active, min_delay_secs, max_delay_secs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    s.id.as_str(),
                    s.user_id.as_str(),
                    s.name,
                    s.entry_trigger,
                    s.active,
                    s.pacing.min_delay_secs,
                    s.pacing.max_delay_secs,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a step of an existing sequence.
pub async fn insert_step(db: &Database, step: &SequenceStep) -> Result<(), FlotillaError> {
    let s = step.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sequence_steps
                    (id, sequence_id, order_index, template, media_url, delay_hours, next_trigger,
                     min_delay_secs, max_delay_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    s.id.as_str(),
                    s.sequence_id.as_str(),
                    s.order_index,
                    s.template,
                    s.media_url,
                    s.delay_hours,
                    s.next_trigger,
                    s.pacing.min_delay_secs,
                    s.pacing.max_delay_secs,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Look up a sequence by id.
pub async fn get_sequence(
    db: &Database,
    id: &SequenceId,
) -> Result<Option<Sequence>, FlotillaError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| load_sequence(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// Steps of a sequence ordered by `order_index`.
pub async fn get_steps(db: &Database, id: &SequenceId) -> Result<Vec<SequenceStep>, FlotillaError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| load_steps(conn, &id))
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::PacingOverride;
    use tempfile::tempdir;

    #[tokio::test]
    async fn steps_come_back_ordered_and_triggers_resolve() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc::now();

        let seq = Sequence {
            id: SequenceId::from("s1"),
            user_id: UserId::from("u1"),
            name: "Onboarding".into(),
            entry_trigger: Some("welcome".into()),
            active: true,
            pacing: PacingOverride::default(),
        };
        insert_sequence(&db, &seq, now).await.unwrap();
        for (id, idx) in [("st2", 2), ("st0", 0), ("st1", 1)] {
            insert_step(
                &db,
                &SequenceStep {
                    id: StepId::from(id),
                    sequence_id: seq.id.clone(),
                    order_index: idx,
                    template: format!("step {idx}"),
                    media_url: None,
                    delay_hours: Some(24),
                    next_trigger: None,
                    pacing: PacingOverride::default(),
                },
            )
            .await
            .unwrap();
        }

        let steps = get_steps(&db, &seq.id).await.unwrap();
        let order: Vec<_> = steps.iter().map(|s| s.order_index).collect();
        assert_eq!(order, vec![0, 1, 2]);

        let resolved = db
            .connection()
            .call(|conn| -> Result<_, rusqlite::Error> {
                Ok((
                    find_by_trigger(conn, "u1", "welcome")?,
                    find_by_trigger(conn, "u2", "welcome")?,
                ))
            })
            .await
            .unwrap();
        assert_eq!(resolved, (Some(SequenceId::from("s1")), None));
        assert!(get_sequence(&db, &seq.id).await.unwrap().unwrap().active);
        db.close().await.unwrap();
    }
}
