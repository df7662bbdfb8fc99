// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stuck message recovery.

use chrono::Duration;
use flotilla_core::{DeviceStatus, MessageStatus};
use flotilla_engine::ReclaimReport;
use flotilla_storage::queries::messages;
use flotilla_test_utils::TestHarness;

#[tokio::test]
async fn stale_claims_return_to_pending_and_fresh_ones_stay() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let stale = h.enqueue("u1", "d1", "+100").await.unwrap();
    messages::claim(&h.db, &stale, "t-stale", h.now())
        .await
        .unwrap()
        .unwrap();

    h.advance(Duration::minutes(10));
    let untouched = h.enqueue("u1", "d1", "+101").await.unwrap();
    let fresh = h.enqueue("u1", "d1", "+102").await.unwrap();
    messages::claim(&h.db, &fresh, "t-fresh", h.now())
        .await
        .unwrap()
        .unwrap();

    let report = h.engine.reclaimer().sweep().await.unwrap();
    assert_eq!(report, ReclaimReport { reverted: 1, expired: 0 });

    let row = messages::get_message(&h.db, &stale).await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Pending);
    assert_eq!(row.reclaim_count, 1);
    assert!(row.claim_token.is_none());
    assert!(row.claimed_at.is_none());

    let row = messages::get_message(&h.db, &untouched).await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Pending);
    assert_eq!(row.reclaim_count, 0);
    let row = messages::get_message(&h.db, &fresh).await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Processing);

    let again = h.engine.reclaimer().sweep().await.unwrap();
    assert_eq!(again, ReclaimReport::default());
}

#[tokio::test]
async fn reclaimed_rows_are_sent_again() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let id = h.enqueue("u1", "d1", "+100").await.unwrap();
    messages::claim(&h.db, &id, "crashed-worker", h.now())
        .await
        .unwrap()
        .unwrap();

    h.advance(Duration::minutes(6));
    h.engine.reclaimer().sweep().await.unwrap();

    let mut deliveries = tokio::task::JoinSet::new();
    assert_eq!(h.engine.pool().poll_once(&mut deliveries).await.unwrap(), 1);
    while deliveries.join_next().await.is_some() {}

    let row = messages::get_message(&h.db, &id).await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Sent);
    assert_eq!(h.sends().count(), 1);
}

#[tokio::test]
async fn long_queued_rows_expire_as_failed() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let parked = h.enqueue("u1", "d1", "+100").await.unwrap();
    let pending = h.enqueue("u1", "d1", "+101").await.unwrap();

    let id = parked.to_string();
    let moved = h
        .db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE messages SET status = 'queued' WHERE id = ?1",
                rusqlite::params![id],
            )
        })
        .await
        .unwrap();
    assert_eq!(moved, 1);

    h.advance(Duration::hours(11));
    assert_eq!(h.engine.reclaimer().sweep().await.unwrap().expired, 0);

    h.advance(Duration::hours(2));
    let report = h.engine.reclaimer().sweep().await.unwrap();
    assert_eq!(report.expired, 1);

    let row = messages::get_message(&h.db, &parked).await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Failed);
    assert!(row.error.unwrap().contains("abandoned"));
    let row = messages::get_message(&h.db, &pending).await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Pending);
}
