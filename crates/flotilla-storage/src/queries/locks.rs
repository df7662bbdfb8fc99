// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user broadcast locks.
//!
//! A lock row older than the caller's cutoff is treated as absent: it can be
//! taken over and is ignored by reads.

use chrono::{DateTime, Utc};
use flotilla_core::{BroadcastKind, FlotillaError, UserId};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{BroadcastLock, enum_col, fmt_ts, ts_col};

/// Take the user's lock if it is free or older than `stale_before`.
///
/// Returns false when a live lock is held by someone else.
pub async fn try_lock(
    db: &Database,
    user_id: &UserId,
    kind: BroadcastKind,
    broadcast_id: &str,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<bool, FlotillaError> {
    let user_id = user_id.0.clone();
    let broadcast_id = broadcast_id.to_string();
    let now = fmt_ts(now);
    let stale_before = fmt_ts(stale_before);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT INTO broadcast_locks (user_id, broadcast_type, broadcast_id, locked_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    broadcast_type = excluded.broadcast_type,
                    broadcast_id = excluded.broadcast_id,
                    locked_at = excluded.locked_at
                 WHERE broadcast_locks.locked_at < ?5",
                params![user_id, kind.as_ref(), broadcast_id, now, stale_before],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Release the user's lock. Returns whether a row was removed.
pub async fn unlock(db: &Database, user_id: &UserId) -> Result<bool, FlotillaError> {
    let user_id = user_id.0.clone();
    db.connection()
        .call(move |conn| {
            let changed =
                conn.execute("DELETE FROM broadcast_locks WHERE user_id = ?1", params![user_id])?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Release the user's lock only if it still belongs to `broadcast_id`.
pub async fn unlock_broadcast(
    db: &Database,
    user_id: &UserId,
    broadcast_id: &str,
) -> Result<bool, FlotillaError> {
    let user_id = user_id.0.clone();
    let broadcast_id = broadcast_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM broadcast_locks WHERE user_id = ?1 AND broadcast_id = ?2",
                params![user_id, broadcast_id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// The user's lock if it was taken at or after `stale_before`.
pub async fn live_lock(
    db: &Database,
    user_id: &UserId,
    stale_before: DateTime<Utc>,
) -> Result<Option<BroadcastLock>, FlotillaError> {
    let user_id = user_id.0.clone();
    let stale_before = fmt_ts(stale_before);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT user_id, broadcast_type, broadcast_id, locked_at FROM broadcast_locks
                 WHERE user_id = ?1 AND locked_at >= ?2",
                params![user_id, stale_before],
                |row| {
                    Ok(BroadcastLock {
                        user_id: UserId(row.get(0)?),
                        kind: enum_col(row, 1)?,
                        broadcast_id: row.get(2)?,
                        locked_at: ts_col(row, 3)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All live locks, for status reporting.
pub async fn list_live(
    db: &Database,
    stale_before: DateTime<Utc>,
) -> Result<Vec<BroadcastLock>, FlotillaError> {
    let stale_before = fmt_ts(stale_before);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, broadcast_type, broadcast_id, locked_at FROM broadcast_locks
                 WHERE locked_at >= ?1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![stale_before], |row| {
                Ok(BroadcastLock {
                    user_id: UserId(row.get(0)?),
                    kind: enum_col(row, 1)?,
                    broadcast_id: row.get(2)?,
                    locked_at: ts_col(row, 3)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete every lock taken before `stale_before`. Returns how many were removed.
pub async fn delete_stale(
    db: &Database,
    stale_before: DateTime<Utc>,
) -> Result<usize, FlotillaError> {
    let stale_before = fmt_ts(stale_before);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM broadcast_locks WHERE locked_at < ?1",
                params![stale_before],
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn live_lock_blocks_and_stale_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let user = UserId::from("u1");
        let t0 = Utc::now();
        let ttl = Duration::minutes(120);

        assert!(try_lock(&db, &user, BroadcastKind::Campaign, "c1", t0, t0 - ttl).await.unwrap());

        let t1 = t0 + Duration::minutes(10);
        assert!(!try_lock(&db, &user, BroadcastKind::Campaign, "c2", t1, t1 - ttl).await.unwrap());
        let held = live_lock(&db, &user, t1 - ttl).await.unwrap().unwrap();
        assert_eq!(held.broadcast_id, "c1");
        assert_eq!(held.kind, BroadcastKind::Campaign);

        let t2 = t0 + Duration::minutes(121);
        assert!(live_lock(&db, &user, t2 - ttl).await.unwrap().is_none());
        assert!(try_lock(&db, &user, BroadcastKind::Sequence, "s1", t2, t2 - ttl).await.unwrap());
        let held = live_lock(&db, &user, t2 - ttl).await.unwrap().unwrap();
        assert_eq!(held.broadcast_id, "s1");

        assert!(unlock(&db, &user).await.unwrap());
        assert!(!unlock(&db, &user).await.unwrap());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_rows() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc::now();
        let ttl = Duration::minutes(120);
        try_lock(&db, &UserId::from("old"), BroadcastKind::Campaign, "c1", now - Duration::hours(3), now - Duration::hours(10))
            .await
            .unwrap();
        try_lock(&db, &UserId::from("new"), BroadcastKind::Campaign, "c2", now, now - ttl)
            .await
            .unwrap();

        assert_eq!(delete_stale(&db, now - ttl).await.unwrap(), 1);
        let live = list_live(&db, now - ttl).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].user_id.as_str(), "new");
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn release_by_broadcast_leaves_other_holders() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let user = UserId::from("u1");
        let now = Utc::now();
        try_lock(&db, &user, BroadcastKind::Campaign, "c1", now, now - Duration::minutes(120))
            .await
            .unwrap();

        assert!(!unlock_broadcast(&db, &user, "c2").await.unwrap());
        assert!(unlock_broadcast(&db, &user, "c1").await.unwrap());
        assert!(live_lock(&db, &user, now - Duration::minutes(120)).await.unwrap().is_none());
        db.close().await.unwrap();
    }
}
