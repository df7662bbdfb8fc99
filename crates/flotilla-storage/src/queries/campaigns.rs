// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign rows and their materialization into the message queue.

use chrono::{DateTime, Utc};
use flotilla_core::{CampaignId, FlotillaError, UserId};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{
    Campaign, CampaignStatus, NewMessage, enum_col, fmt_opt_ts, fmt_ts, opt_ts_col, pacing_cols,
};
use crate::queries::messages::insert_message_row;

const CAMPAIGN_COLUMNS: &str = "id, user_id, title, niche, target_status, template, media_url, \
     min_delay_secs, max_delay_secs, status, scheduled_at, completed_at";

fn row_to_campaign(row: &rusqlite::Row<'_>) -> Result<Campaign, rusqlite::Error> {
    Ok(Campaign {
        id: CampaignId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        title: row.get(2)?,
        niche: row.get(3)?,
        target_status: row.get(4)?,
        template: row.get(5)?,
        media_url: row.get(6)?,
        pacing: pacing_cols(row, 7)?,
        status: enum_col(row, 9)?,
        scheduled_at: opt_ts_col(row, 10)?,
        completed_at: opt_ts_col(row, 11)?,
    })
}

/// Insert a campaign row.
pub async fn insert_campaign(
    db: &Database,
    campaign: &Campaign,
    now: DateTime<Utc>,
) -> Result<(), FlotillaError> {
    let c = campaign.clone();
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns
                    (id, user_id, title, niche, target_status, template, media_url,
                     min_delay_secs, max_delay_secs, status, scheduled_at, completed_at,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    c.id.as_str(),
                    c.user_id.as_str(),
                    c.title,
                    c.niche,
                    c.target_status,
                    c.template,
                    c.media_url,
                    c.pacing.min_delay_secs,
                    c.pacing.max_delay_secs,
                    c.status.as_ref(),
                    fmt_opt_ts(c.scheduled_at),
                    fmt_opt_ts(c.completed_at),
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Look up a campaign by id.
pub async fn get_campaign(
    db: &Database,
    id: &CampaignId,
) -> Result<Option<Campaign>, FlotillaError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                row_to_campaign,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Pending campaigns that are unscheduled or scheduled at or before `now`.
pub async fn due_pending(db: &Database, now: DateTime<Utc>) -> Result<Vec<Campaign>, FlotillaError> {
    let now = fmt_ts(now);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
                 WHERE status = 'pending' AND (scheduled_at IS NULL OR scheduled_at <= ?1)
                 ORDER BY COALESCE(scheduled_at, created_at), id"
            ))?;
            let rows = stmt.query_map(params![now], row_to_campaign)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Campaigns whose status may still move: started and unfinished, or
/// terminal with unfinished rows after an explicit retry.
pub async fn list_unsettled(db: &Database) -> Result<Vec<Campaign>, FlotillaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns c
                 WHERE c.status IN ('triggered', 'processing')
                    OR (c.status IN ('finished', 'failed') AND EXISTS (
                        SELECT 1 FROM messages m
                        WHERE m.campaign_id = c.id
                          AND m.status IN ('pending', 'queued', 'processing')))
                 ORDER BY c.id"
            ))?;
            let rows = stmt.query_map([], row_to_campaign)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Move a campaign from `from` to `to`, stamping `completed_at` when `to` is terminal.
///
/// Returns false if the campaign was no longer in `from`.
pub async fn transition_status(
    db: &Database,
    id: &CampaignId,
    from: CampaignStatus,
    to: CampaignStatus,
    now: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    let id = id.0.clone();
    let now = fmt_ts(now);
    let completed_at = to.is_terminal().then(|| now.clone());
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE campaigns SET status = ?1, completed_at = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to.as_ref(), completed_at, now, id, from.as_ref()],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a campaign's rows and mark it started, all in one transaction.
///
/// The campaign goes to `triggered`, or straight to `finished` when no row
/// was inserted. Returns `None` if the campaign was no longer `pending`.
pub async fn materialize(
    db: &Database,
    id: &CampaignId,
    rows: Vec<NewMessage>,
    now: DateTime<Utc>,
) -> Result<Option<usize>, FlotillaError> {
    let id = id.0.clone();
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
            let changed = if inserted > 0 {
                tx.execute(
                    "UPDATE campaigns SET status = 'triggered', started_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    params![now, id],
                )?
            } else {
                tx.execute(
                    "UPDATE campaigns
                     SET status = 'finished', started_at = ?1, completed_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    params![now, id],
                )?
            };
            if changed == 0 {
                // Dropping the transaction rolls back the inserts.
                return Ok(None);
            }
            tx.commit()?;
            Ok(Some(inserted))
        })
        .await
        .map_err(map_tr_err)
}

/// Number of a user's campaigns currently sending.
pub async fn count_running(db: &Database, user_id: &UserId) -> Result<u64, FlotillaError> {
    let user_id = user_id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM campaigns
                 WHERE user_id = ?1 AND status IN ('triggered', 'processing')",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as u64)
        .map_err(map_tr_err)
}

/// Latest `completed_at` among a user's finished or failed campaigns.
pub async fn last_completed_at(
    db: &Database,
    user_id: &UserId,
) -> Result<Option<DateTime<Utc>>, FlotillaError> {
    let user_id = user_id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT MAX(completed_at) FROM campaigns
                 WHERE user_id = ?1 AND status IN ('finished', 'failed')",
                params![user_id],
                |row| opt_ts_col(row, 0),
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::messages;
    use chrono::Duration;
    use flotilla_core::{DeviceId, PacingOverride};
    use tempfile::tempdir;

    async fn setup() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    fn campaign(id: &str, scheduled_at: Option<DateTime<Utc>>) -> Campaign {
        Campaign {
            id: CampaignId::from(id),
            user_id: UserId::from("u1"),
            title: "Spring promo".into(),
            niche: None,
            target_status: None,
            template: "Hi {name}".into(),
            media_url: None,
            pacing: PacingOverride::new(Some(3), Some(6)),
            status: CampaignStatus::Pending,
            scheduled_at,
            completed_at: None,
        }
    }

    fn row(campaign: &str, recipient: &str, now: DateTime<Utc>) -> NewMessage {
        NewMessage {
            user_id: UserId::from("u1"),
            device_id: DeviceId::from("d1"),
            campaign_id: Some(CampaignId::from(campaign)),
            sequence_id: None,
            step_id: None,
            step_index: None,
            recipient: recipient.into(),
            recipient_name: String::new(),
            template: "Hi {name}".into(),
            media_url: None,
            scheduled_at: now,
            pacing: PacingOverride::default(),
        }
    }

    #[tokio::test]
    async fn due_respects_schedule() {
        let (db, _dir) = setup().await;
        let now = Utc::now();
        insert_campaign(&db, &campaign("now", None), now).await.unwrap();
        insert_campaign(&db, &campaign("later", Some(now + Duration::hours(1))), now)
            .await
            .unwrap();

        let due = due_pending(&db, now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id.as_str(), "now");
        assert_eq!(due[0].pacing, PacingOverride::new(Some(3), Some(6)));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn materialize_is_one_shot() {
        let (db, _dir) = setup().await;
        let now = Utc::now();
        let id = CampaignId::from("c1");
        insert_campaign(&db, &campaign("c1", None), now).await.unwrap();

        let rows = vec![row("c1", "+1", now), row("c1", "+2", now), row("c1", "+1", now)];
        let inserted = materialize(&db, &id, rows.clone(), now).await.unwrap();
        assert_eq!(inserted, Some(2));

        let got = get_campaign(&db, &id).await.unwrap().unwrap();
        assert_eq!(got.status, CampaignStatus::Triggered);
        assert_eq!(count_running(&db, &UserId::from("u1")).await.unwrap(), 1);

        // A second pass over the same campaign is a no-op.
        assert_eq!(materialize(&db, &id, rows, now).await.unwrap(), None);
        let counts = messages::counts(&db, messages::Scope::Campaign(id)).await.unwrap();
        assert_eq!(counts.pending, 2);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn empty_audience_finishes_immediately() {
        let (db, _dir) = setup().await;
        let now = Utc::now();
        let id = CampaignId::from("c1");
        insert_campaign(&db, &campaign("c1", None), now).await.unwrap();

        assert_eq!(materialize(&db, &id, Vec::new(), now).await.unwrap(), Some(0));
        let got = get_campaign(&db, &id).await.unwrap().unwrap();
        assert_eq!(got.status, CampaignStatus::Finished);
        assert!(got.completed_at.is_some());
        assert_eq!(
            last_completed_at(&db, &UserId::from("u1")).await.unwrap(),
            got.completed_at
        );
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let (db, _dir) = setup().await;
        let now = Utc::now();
        let id = CampaignId::from("c1");
        insert_campaign(&db, &campaign("c1", None), now).await.unwrap();
        materialize(&db, &id, vec![row("c1", "+1", now)], now)
            .await
            .unwrap();

        assert!(
            transition_status(&db, &id, CampaignStatus::Triggered, CampaignStatus::Processing, now)
                .await
                .unwrap()
        );
        assert!(
            !transition_status(&db, &id, CampaignStatus::Triggered, CampaignStatus::Failed, now)
                .await
                .unwrap()
        );
        let unsettled = list_unsettled(&db).await.unwrap();
        assert_eq!(unsettled.len(), 1);
        db.close().await.unwrap();
    }
}
