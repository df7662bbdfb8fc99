// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence enrollments.
//!
//! Enrolling walks the sequence graph and writes the planned rows, the
//! enrollment records, and the contact's trigger removal in one transaction.
//! Uniqueness guards on `messages` and `enrollments` make a repeated
//! enrollment insert nothing.

use chrono::{DateTime, Utc};
use flotilla_core::sequence::{self, StepSchedule, is_link_label};
use flotilla_core::{ContactId, DeviceId, FlotillaError, MessageId, SequenceId, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{
    Enrollment, NewMessage, QueuedMessage, SequenceStep, enum_col, fmt_ts, ts_col,
};
use crate::queries::contacts::remove_trigger;
use crate::queries::messages::insert_message_row;
use crate::queries::sequences::{ConnSource, find_by_trigger, load_sequence, load_steps};

/// Who to enroll, where, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollRequest {
    pub user_id: UserId,
    pub device_id: DeviceId,
    /// Contact whose trigger list should lose `trigger` on success.
    pub contact_id: Option<ContactId>,
    pub recipient: String,
    pub recipient_name: String,
    pub sequence_id: SequenceId,
    pub trigger: Option<String>,
}

/// What an enrollment wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollmentReport {
    /// Steps the walk scheduled.
    pub planned: usize,
    /// Rows actually inserted; the rest already existed.
    pub inserted: usize,
    /// Sequences entered, in walk order.
    pub visited: Vec<SequenceId>,
}

impl EnrollmentReport {
    /// Every planned step was already queued by an earlier enrollment.
    pub fn is_duplicate(&self) -> bool {
        self.planned > 0 && self.inserted == 0
    }
}

/// What the progression hook did for one sent row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// The enrollment reached its final step.
    pub completed: bool,
    /// Row materialized for the next step, when chain activation is on.
    pub materialized: Option<MessageId>,
}

fn insert_enrollment(
    conn: &Connection,
    sequence_id: &str,
    req: &EnrollRequest,
    now: &str,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "INSERT INTO enrollments
            (sequence_id, recipient, user_id, device_id, recipient_name, trigger_label,
             current_step, status, enrolled_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'active', ?7, ?7)
         ON CONFLICT DO NOTHING",
        params![
            sequence_id,
            req.recipient,
            req.user_id.as_str(),
            req.device_id.as_str(),
            req.recipient_name,
            req.trigger,
            now,
        ],
    )
}

fn step_message(
    step: &SequenceStep,
    scheduled_at: DateTime<Utc>,
    pacing: flotilla_core::PacingOverride,
    user_id: &UserId,
    device_id: &DeviceId,
    recipient: &str,
    recipient_name: &str,
) -> NewMessage {
    NewMessage {
        user_id: user_id.clone(),
        device_id: device_id.clone(),
        campaign_id: None,
        sequence_id: Some(step.sequence_id.clone()),
        step_id: Some(step.id.clone()),
        step_index: Some(step.order_index),
        recipient: recipient.to_string(),
        recipient_name: recipient_name.to_string(),
        template: step.template.clone(),
        media_url: step.media_url.clone(),
        scheduled_at,
        pacing,
    }
}

/// Enroll a recipient, materializing the rows `schedule` calls for.
pub async fn enroll(
    db: &Database,
    req: EnrollRequest,
    schedule: StepSchedule,
    now: DateTime<Utc>,
) -> Result<EnrollmentReport, FlotillaError> {
    let now_s = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let walk = {
                let mut source = ConnSource {
                    conn: &tx,
                    user_id: req.user_id.as_str(),
                };
                sequence::walk(&mut source, &req.sequence_id, now, &schedule)?
            };

            let mut inserted = 0;
            for planned in &walk.steps {
                let row = step_message(
                    &planned.step,
                    planned.scheduled_at,
                    planned.pacing,
                    &req.user_id,
                    &req.device_id,
                    &req.recipient,
                    &req.recipient_name,
                );
                if insert_message_row(&tx, &row, &now_s)?.is_some() {
                    inserted += 1;
                }
            }
            for sequence_id in &walk.visited {
                insert_enrollment(&tx, sequence_id.as_str(), &req, &now_s)?;
            }
            if let (Some(contact_id), Some(trigger)) = (&req.contact_id, &req.trigger) {
                remove_trigger(&tx, contact_id.as_str(), trigger, &now_s)?;
            }
            tx.commit()?;

            Ok(EnrollmentReport {
                planned: walk.steps.len(),
                inserted,
                visited: walk.visited,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Record that `message` was sent and, with `chain` set, queue the step after it.
///
/// Under chain activation the step after a sequence's last step is the first
/// step of the sequence its `next_trigger` links to. That link is followed
/// only if the recipient has no enrollment there yet, which is what stops a
/// cycle of linked sequences from re-enrolling forever.
pub async fn advance(
    db: &Database,
    message: &QueuedMessage,
    schedule: StepSchedule,
    chain: bool,
    now: DateTime<Utc>,
) -> Result<AdvanceOutcome, FlotillaError> {
    let (Some(sequence_id), Some(step_id)) = (message.sequence_id.clone(), message.step_id.clone())
    else {
        return Ok(AdvanceOutcome::default());
    };
    let message = message.clone();
    let sent_at = message.sent_at.unwrap_or(now);
    let now_s = fmt_ts(now);

    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let steps = load_steps(&tx, sequence_id.as_str())?;
            let Some(position) = steps.iter().position(|s| s.id == step_id) else {
                return Ok(AdvanceOutcome::default());
            };
            let reached = (position + 1) as i64;
            let completed = position + 1 == steps.len();

            tx.execute(
                "UPDATE enrollments
                 SET current_step = MAX(current_step, ?1),
                     status = CASE WHEN ?2 THEN 'completed' ELSE status END,
                     updated_at = ?3
                 WHERE sequence_id = ?4 AND recipient = ?5",
                params![reached, completed, now_s, sequence_id.as_str(), message.recipient],
            )?;

            let mut outcome = AdvanceOutcome {
                completed,
                materialized: None,
            };
            if !chain {
                tx.commit()?;
                return Ok(outcome);
            }

            let next = if let Some(next) = steps.get(position + 1) {
                let sequence_pacing = load_sequence(&tx, sequence_id.as_str())?
                    .map(|s| s.pacing)
                    .unwrap_or_default();
                Some((next.clone(), next.pacing.or(sequence_pacing)))
            } else {
                linked_first_step(&tx, &message, &steps, &now_s)?
            };

            if let Some((step, pacing)) = next {
                let row = step_message(
                    &step,
                    schedule.after(sent_at, &step),
                    pacing,
                    &message.user_id,
                    &message.device_id,
                    &message.recipient,
                    &message.recipient_name,
                );
                outcome.materialized = insert_message_row(&tx, &row, &now_s)?;
            }
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// First step of the sequence linked from the last of `steps`, enrolling the
/// recipient there. `None` when there is no link or they are already enrolled.
fn linked_first_step(
    conn: &Connection,
    message: &QueuedMessage,
    steps: &[SequenceStep],
    now: &str,
) -> Result<Option<(SequenceStep, flotilla_core::PacingOverride)>, rusqlite::Error> {
    let Some(label) = steps.last().and_then(|s| s.next_trigger.as_deref()) else {
        return Ok(None);
    };
    if !is_link_label(label) {
        return Ok(None);
    }
    let Some(linked) = find_by_trigger(conn, message.user_id.as_str(), label.trim())? else {
        return Ok(None);
    };
    if enrollment_exists(conn, linked.as_str(), &message.recipient)? {
        return Ok(None);
    }
    let Some(sequence) = load_sequence(conn, linked.as_str())? else {
        return Ok(None);
    };
    let Some(first) = load_steps(conn, linked.as_str())?.into_iter().next() else {
        return Ok(None);
    };

    let req = EnrollRequest {
        user_id: message.user_id.clone(),
        device_id: message.device_id.clone(),
        contact_id: None,
        recipient: message.recipient.clone(),
        recipient_name: message.recipient_name.clone(),
        sequence_id: linked.clone(),
        trigger: Some(label.trim().to_string()),
    };
    insert_enrollment(conn, linked.as_str(), &req, now)?;
    let pacing = first.pacing.or(sequence.pacing);
    Ok(Some((first, pacing)))
}

fn enrollment_exists(
    conn: &Connection,
    sequence_id: &str,
    recipient: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE sequence_id = ?1 AND recipient = ?2",
        params![sequence_id, recipient],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

/// Look up one enrollment.
pub async fn get_enrollment(
    db: &Database,
    sequence_id: &SequenceId,
    recipient: &str,
) -> Result<Option<Enrollment>, FlotillaError> {
    let sequence_id = sequence_id.0.clone();
    let recipient = recipient.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT sequence_id, recipient, user_id, device_id, recipient_name, trigger_label,
                        current_step, status, enrolled_at
                 FROM enrollments WHERE sequence_id = ?1 AND recipient = ?2",
                params![sequence_id, recipient],
                |row| {
                    Ok(Enrollment {
                        sequence_id: SequenceId(row.get(0)?),
                        recipient: row.get(1)?,
                        user_id: UserId(row.get(2)?),
                        device_id: DeviceId(row.get(3)?),
                        recipient_name: row.get(4)?,
                        trigger_label: row.get(5)?,
                        current_step: row.get(6)?,
                        status: enum_col(row, 7)?,
                        enrolled_at: ts_col(row, 8)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{contacts, messages, sequences};
    use chrono::Duration;
    use flotilla_core::types::{Contact, EnrollmentStatus, Sequence};
    use flotilla_core::{MessageStatus, PacingOverride, StepId};
    use tempfile::tempdir;

    /// Storage keeps millisecond precision.
    fn now_ms() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    fn schedule(first_step_only: bool) -> StepSchedule {
        StepSchedule {
            bootstrap: Duration::zero(),
            default_step_delay: Duration::hours(24),
            first_step_only,
        }
    }

    async fn setup() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    async fn seed_sequence(
        db: &Database,
        id: &str,
        trigger: &str,
        delays: &[Option<i64>],
        next_trigger: Option<&str>,
    ) {
        let now = Utc::now();
        sequences::insert_sequence(
            db,
            &Sequence {
                id: SequenceId::from(id),
                user_id: UserId::from("u1"),
                name: id.to_string(),
                entry_trigger: Some(trigger.to_string()),
                active: true,
                pacing: PacingOverride::default(),
            },
            now,
        )
        .await
        .unwrap();
        for (i, delay) in delays.iter().enumerate() {
            let last = i + 1 == delays.len();
            sequences::insert_step(
                db,
                &SequenceStep {
                    id: StepId(format!("{id}-{i}")),
                    sequence_id: SequenceId::from(id),
                    order_index: i as i64,
                    template: format!("{id} step {i}"),
                    media_url: None,
                    delay_hours: *delay,
                    next_trigger: if last { next_trigger.map(str::to_string) } else { None },
                    pacing: PacingOverride::default(),
                },
            )
            .await
            .unwrap();
        }
    }

    fn request(sequence: &str, trigger: Option<&str>) -> EnrollRequest {
        EnrollRequest {
            user_id: UserId::from("u1"),
            device_id: DeviceId::from("d1"),
            contact_id: Some(ContactId::from("c1")),
            recipient: "+15550001".into(),
            recipient_name: "Ana".into(),
            sequence_id: SequenceId::from(sequence),
            trigger: trigger.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn enroll_schedules_every_step() {
        let (db, _dir) = setup().await;
        seed_sequence(&db, "s1", "welcome", &[Some(0), Some(24), Some(24)], None).await;
        let now = now_ms();

        let report = enroll(&db, request("s1", None), schedule(false), now).await.unwrap();
        assert_eq!(report.planned, 3);
        assert_eq!(report.inserted, 3);
        assert!(!report.is_duplicate());

        let rows = messages::list_messages(&db, messages::Scope::Sequence(SequenceId::from("s1")))
            .await
            .unwrap();
        let offsets: Vec<i64> = rows
            .iter()
            .map(|m| (m.scheduled_at - now).num_hours())
            .collect();
        assert_eq!(offsets, vec![0, 24, 48]);

        let again = enroll(&db, request("s1", None), schedule(false), now).await.unwrap();
        assert!(again.is_duplicate());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn cyclic_links_visit_each_sequence_once() {
        let (db, _dir) = setup().await;
        seed_sequence(&db, "a", "start_a", &[None], Some("start_b")).await;
        seed_sequence(&db, "b", "start_b", &[None], Some("start_a")).await;

        let report = enroll(&db, request("a", None), schedule(false), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.visited, vec![SequenceId::from("a"), SequenceId::from("b")]);
        assert_eq!(report.inserted, 2);
        for seq in ["a", "b"] {
            let e = get_enrollment(&db, &SequenceId::from(seq), "+15550001")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(e.status, EnrollmentStatus::Active);
        }
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn enroll_consumes_the_trigger() {
        let (db, _dir) = setup().await;
        seed_sequence(&db, "s1", "welcome", &[Some(0)], None).await;
        let now = Utc::now();
        contacts::insert_contact(
            &db,
            &Contact {
                id: ContactId::from("c1"),
                user_id: UserId::from("u1"),
                device_id: DeviceId::from("d1"),
                phone: "+15550001".into(),
                name: "Ana".into(),
                niche: None,
                status: "prospect".into(),
                triggers: vec!["welcome".into(), "vip".into()],
            },
            now,
        )
        .await
        .unwrap();

        enroll(&db, request("s1", Some("welcome")), schedule(false), now)
            .await
            .unwrap();
        let contact = contacts::get_contact(&db, &ContactId::from("c1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contact.triggers, vec!["vip"]);
        db.close().await.unwrap();
    }

    async fn send(db: &Database, id: &MessageId, at: DateTime<Utc>) -> QueuedMessage {
        messages::claim(db, id, "tok", at).await.unwrap().unwrap();
        assert!(messages::mark_sent(db, id, "tok", "pm", at).await.unwrap());
        messages::get_message(db, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn chain_activation_materializes_one_step_at_a_time() {
        let (db, _dir) = setup().await;
        seed_sequence(&db, "a", "start_a", &[Some(0), Some(2)], Some("start_b")).await;
        seed_sequence(&db, "b", "start_b", &[Some(5)], Some("start_a")).await;
        let t0 = now_ms();

        let report = enroll(&db, request("a", None), schedule(true), t0).await.unwrap();
        assert_eq!((report.planned, report.inserted), (1, 1));

        let first = messages::list_messages(&db, messages::Scope::Sequence(SequenceId::from("a")))
            .await
            .unwrap()
            .remove(0);
        let sent = send(&db, &first.id, t0).await;
        let out = advance(&db, &sent, schedule(true), true, t0).await.unwrap();
        assert!(!out.completed);
        let second_id = out.materialized.unwrap();
        let second = messages::get_message(&db, &second_id).await.unwrap().unwrap();
        assert_eq!(second.scheduled_at, t0 + Duration::hours(2));

        let t1 = t0 + Duration::hours(2);
        let sent = send(&db, &second_id, t1).await;
        let out = advance(&db, &sent, schedule(true), true, t1).await.unwrap();
        assert!(out.completed);
        let linked = messages::get_message(&db, &out.materialized.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.sequence_id, Some(SequenceId::from("b")));
        assert_eq!(linked.scheduled_at, t1 + Duration::hours(5));
        assert_eq!(linked.status, MessageStatus::Pending);

        // b links back to a, where the recipient is already enrolled.
        let t2 = t1 + Duration::hours(5);
        let sent = send(&db, &linked.id, t2).await;
        let out = advance(&db, &sent, schedule(true), true, t2).await.unwrap();
        assert!(out.completed);
        assert!(out.materialized.is_none());

        let a = get_enrollment(&db, &SequenceId::from("a"), "+15550001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.status, EnrollmentStatus::Completed);
        assert_eq!(a.current_step, 2);
        db.close().await.unwrap();
    }
}
