// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequence enrollment, trigger sweeps, and progression.

use chrono::Duration;
use flotilla_config::ProgressionPolicy;
use flotilla_core::types::EnrollmentStatus;
use flotilla_core::{ContactId, DeviceStatus, FlotillaError, MessageStatus, SequenceId};
use flotilla_storage::queries::{contacts, enrollments, messages};
use flotilla_storage::Scope;
use flotilla_test_utils::TestHarness;
use tokio::task::JoinSet;

#[tokio::test]
async fn three_step_schedule_accumulates_from_bootstrap() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let contact = h.add_contact("u1", "d1", "c1", "+15550001", &[]).await.unwrap();
    h.add_sequence("u1", "s1", None, &[(Some(0), None), (Some(24), None), (Some(48), None)])
        .await
        .unwrap();
    let t = h.now();

    let report = h
        .engine
        .enrollment()
        .enroll(&contact, &SequenceId::from("s1"), None)
        .await
        .unwrap();
    assert_eq!(report.planned, 3);
    assert_eq!(report.inserted, 3);

    let mut rows = messages::list_messages(&h.db, Scope::Sequence(SequenceId::from("s1")))
        .await
        .unwrap();
    rows.sort_by_key(|r| r.step_index);
    let times: Vec<_> = rows.iter().map(|r| r.scheduled_at).collect();
    let first = t + Duration::minutes(5);
    assert_eq!(
        times,
        vec![first, first + Duration::hours(24), first + Duration::hours(72)]
    );
    assert!(rows.iter().all(|r| r.status == MessageStatus::Pending));
    assert!(rows.iter().all(|r| r.recipient == "+15550001"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_enrollments_insert_each_step_once() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let contact = h.add_contact("u1", "d1", "c1", "+15550001", &[]).await.unwrap();
    h.add_sequence("u1", "s1", None, &[(None, None), (None, None), (None, None)])
        .await
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let engine = h.engine.enrollment().clone();
        let contact = contact.clone();
        tasks.spawn(async move {
            engine
                .enroll(&contact, &SequenceId::from("s1"), None)
                .await
                .unwrap()
        });
    }
    let mut inserted = 0;
    let mut duplicates = 0;
    while let Some(report) = tasks.join_next().await {
        let report = report.unwrap();
        inserted += report.inserted;
        if report.is_duplicate() {
            duplicates += 1;
        }
    }

    assert_eq!(inserted, 3);
    assert_eq!(duplicates, 7);
    let counts = messages::counts(&h.db, Scope::Sequence(SequenceId::from("s1")))
        .await
        .unwrap();
    assert_eq!(counts.total(), 3);
}

#[tokio::test]
async fn linked_cycle_visits_each_sequence_once() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let contact = h.add_contact("u1", "d1", "c1", "+15550001", &[]).await.unwrap();
    h.add_sequence("u1", "a", Some("start_a"), &[(None, None), (None, Some("start_b"))])
        .await
        .unwrap();
    h.add_sequence("u1", "b", Some("start_b"), &[(Some(2), Some("start_a"))])
        .await
        .unwrap();

    let report = h
        .engine
        .enrollment()
        .enroll(&contact, &SequenceId::from("a"), None)
        .await
        .unwrap();
    assert_eq!(report.visited, vec![SequenceId::from("a"), SequenceId::from("b")]);
    assert_eq!(report.planned, 3);
    assert_eq!(report.inserted, 3);

    let b_rows = messages::list_messages(&h.db, Scope::Sequence(SequenceId::from("b")))
        .await
        .unwrap();
    let a_rows = messages::list_messages(&h.db, Scope::Sequence(SequenceId::from("a")))
        .await
        .unwrap();
    let a_last = a_rows.iter().map(|r| r.scheduled_at).max().unwrap();
    assert_eq!(b_rows.len(), 1);
    assert_eq!(b_rows[0].scheduled_at, a_last + Duration::hours(2));

    for id in ["a", "b"] {
        let enrollment = enrollments::get_enrollment(&h.db, &SequenceId::from(id), "+15550001")
            .await
            .unwrap();
        assert!(enrollment.is_some(), "missing enrollment for {id}");
    }
}

#[tokio::test]
async fn trigger_sweep_enrolls_once_and_consumes_the_label() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    h.add_contact("u1", "d1", "c1", "+15550001", &["welcome"]).await.unwrap();
    h.add_contact("u1", "d1", "c2", "+15550002", &["unrelated"]).await.unwrap();
    h.add_sequence("u1", "s1", Some("welcome"), &[(None, None), (None, None)])
        .await
        .unwrap();

    let report = h.engine.enrollment().process_triggers().await.unwrap();
    assert_eq!(report.enrolled, 1);
    assert_eq!(report.failed, 0);

    let contact = contacts::get_contact(&h.db, &ContactId::from("c1"))
        .await
        .unwrap()
        .unwrap();
    assert!(contact.triggers.is_empty());
    let other = contacts::get_contact(&h.db, &ContactId::from("c2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other.triggers, vec!["unrelated".to_string()]);

    let again = h.engine.enrollment().process_triggers().await.unwrap();
    assert_eq!(again.enrolled, 0);
    let counts = messages::counts(&h.db, Scope::Sequence(SequenceId::from("s1")))
        .await
        .unwrap();
    assert_eq!(counts.total(), 2);
}

#[tokio::test]
async fn unknown_contact_or_sequence_is_not_found() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    h.add_contact("u1", "d1", "c1", "+15550001", &[]).await.unwrap();

    let err = h
        .engine
        .enrollment()
        .enroll_contact(&ContactId::from("nobody"), &SequenceId::from("s1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlotillaError::NotFound { entity: "contact", .. }));

    let err = h
        .engine
        .enrollment()
        .enroll_contact(&ContactId::from("c1"), &SequenceId::from("missing"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FlotillaError::NotFound { entity: "sequence", .. }));
}

/// Send every due row by hand through the pool until nothing is claimed.
async fn send_due(h: &TestHarness) -> usize {
    let mut sent = 0;
    loop {
        let mut deliveries = JoinSet::new();
        let claimed = h.engine.pool().poll_once(&mut deliveries).await.unwrap();
        while deliveries.join_next().await.is_some() {}
        if claimed == 0 {
            return sent;
        }
        sent += claimed;
    }
}

#[tokio::test]
async fn sent_steps_advance_the_enrollment_cursor() {
    let h = TestHarness::new().await.unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let contact = h.add_contact("u1", "d1", "c1", "+15550001", &[]).await.unwrap();
    h.add_sequence("u1", "s1", None, &[(None, None), (None, None)])
        .await
        .unwrap();
    h.engine
        .enrollment()
        .enroll(&contact, &SequenceId::from("s1"), None)
        .await
        .unwrap();

    h.advance(Duration::minutes(5));
    assert_eq!(send_due(&h).await, 1);
    let e = enrollments::get_enrollment(&h.db, &SequenceId::from("s1"), "+15550001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(e.current_step, 1);
    assert_eq!(e.status, EnrollmentStatus::Active);

    h.advance(Duration::hours(24));
    assert_eq!(send_due(&h).await, 1);
    let e = enrollments::get_enrollment(&h.db, &SequenceId::from("s1"), "+15550001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(e.current_step, 2);
    assert_eq!(e.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn chain_activation_materializes_one_step_at_a_time() {
    let h = TestHarness::builder()
        .configure(|c| c.enrollment.policy = ProgressionPolicy::ChainActivation)
        .build()
        .await
        .unwrap();
    h.add_device("u1", "d1", true, DeviceStatus::Online).await.unwrap();
    let contact = h.add_contact("u1", "d1", "c1", "+15550001", &[]).await.unwrap();
    h.add_sequence("u1", "a", Some("start_a"), &[(None, None), (Some(1), Some("start_b"))])
        .await
        .unwrap();
    h.add_sequence("u1", "b", Some("start_b"), &[(Some(3), Some("start_a"))])
        .await
        .unwrap();

    let report = h
        .engine
        .enrollment()
        .enroll(&contact, &SequenceId::from("a"), None)
        .await
        .unwrap();
    assert_eq!(report.planned, 1);

    h.advance(Duration::minutes(5));
    assert_eq!(send_due(&h).await, 1);
    let rows = messages::list_messages(&h.db, Scope::User("u1".into())).await.unwrap();
    assert_eq!(rows.len(), 2);
    let next = rows.iter().find(|r| r.status == MessageStatus::Pending).unwrap();
    assert_eq!(next.step_index, Some(1));
    assert_eq!(next.scheduled_at, h.now() + Duration::hours(1));

    h.advance(Duration::hours(1));
    assert_eq!(send_due(&h).await, 1);
    let b_rows = messages::list_messages(&h.db, Scope::Sequence(SequenceId::from("b")))
        .await
        .unwrap();
    assert_eq!(b_rows.len(), 1);
    assert_eq!(b_rows[0].scheduled_at, h.now() + Duration::hours(3));

    // B links back to A, where the contact is already enrolled.
    h.advance(Duration::hours(3));
    assert_eq!(send_due(&h).await, 1);
    let counts = messages::counts(&h.db, Scope::User("u1".into())).await.unwrap();
    assert_eq!(counts.total(), 3);
    assert_eq!(counts.unfinished(), 0);
}
