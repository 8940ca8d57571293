//! End-to-end flows against a real database.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use chrono::{Duration, Utc};
use secrecy::Secret;
use sqlx::PgPool;
use uuid::Uuid;

use sentinel::config::{Config, DEFAULT_ROLLOVER_CRON};
use sentinel::jobs::rollover;
use sentinel::models::{
    member::CreateMemberData, qualification::CreateQualificationTypeData, Badge,
    BuildingStatus, Checkin, DdsStatus, LockupAction, LockupReason, LockupWarning, Member,
    MemberQualification, MemberType, QualificationType,
};
use sentinel::services::attendance::{self, AttendanceError, ScanDirection, ScanNotice};
use sentinel::services::dds::{self, DdsError};
use sentinel::services::live::{LiveEvent, LiveFeed};
use sentinel::services::import::{self, ImportError};
use sentinel::services::lockup::{self, LockupError, TransferCommand};
use sentinel::services::visitors::{self, SignInRequest};

fn config() -> Config {
    Config {
        database_url: String::new(),
        base_url: "http://localhost:3000".to_string(),
        host: "127.0.0.1".to_string(),
        port: 3000,
        kiosk_api_key: Secret::new("kiosk".to_string()),
        timezone_offset_minutes: 0,
        rollover_cron: DEFAULT_ROLLOVER_CRON.to_string(),
        bootstrap_admin_username: None,
        bootstrap_admin_password: None,
    }
}

/// Creates an active member carrying badge `serial`, optionally lockup-qualified
async fn member_with_badge(pool: &PgPool, serial: &str, qualified: bool) -> Uuid {
    let member = Member::create(
        pool,
        CreateMemberData {
            service_number: format!("SN-{}", serial),
            rank: "PO2".to_string(),
            first_name: "Test".to_string(),
            last_name: serial.to_string(),
            division: None,
            member_type: MemberType::Reserve,
            email: None,
        },
    )
    .await
    .unwrap();

    let badge = Badge::create(pool, serial).await.unwrap();
    assert!(Badge::assign(pool, badge.id, member.id).await.unwrap().is_some());

    if qualified {
        let qualification = match QualificationType::list(pool)
            .await
            .unwrap()
            .into_iter()
            .find(|q| q.code == "BLDG_SEC")
        {
            Some(q) => q,
            None => QualificationType::create(
                pool,
                CreateQualificationTypeData {
                    code: "BLDG_SEC".to_string(),
                    name: "Building Security".to_string(),
                    description: None,
                    grants_lockup: true,
                },
            )
            .await
            .unwrap(),
        };
        MemberQualification::grant(pool, member.id, qualification.id, None)
            .await
            .unwrap();
    }

    member.id
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_lockup_holder_cannot_leave(pool: PgPool) {
    let feed = LiveFeed::default();
    let today = Utc::now().date_naive();
    let alice = member_with_badge(&pool, "A-1", true).await;

    let first = attendance::scan(&pool, &feed, today, "A-1", Some("front")).await.unwrap();
    assert_eq!(first.direction, ScanDirection::In);
    assert!(first.notices.contains(&ScanNotice::BuildingOpened));

    let view = lockup::acquire(&pool, &feed, alice, LockupReason::Manual, None)
        .await
        .unwrap();
    assert_eq!(view.current_holder_id, Some(alice));
    assert_eq!(view.building_status, BuildingStatus::Open);

    let err = attendance::scan(&pool, &feed, today, "A-1", None).await.unwrap_err();
    assert!(matches!(
        err,
        AttendanceError::Lockup(LockupError::HoldsLockup(id)) if id == alice
    ));

    let outcome = lockup::execute(&pool, &feed, Some(alice), false, Some("end of night"))
        .await
        .unwrap();
    assert_eq!(outcome.status.building_status, BuildingStatus::Secured);
    assert_eq!(outcome.members_checked_out, 1);
    assert_eq!(Checkin::count_present(&pool).await.unwrap(), 0);

    let history = lockup::history(&pool, 10, 0).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_dds_acceptance_takes_lockup(pool: PgPool) {
    let feed = LiveFeed::default();
    let mut events = feed.subscribe();
    let today = Utc::now().date_naive();

    let alice = member_with_badge(&pool, "A-1", true).await;
    let bob = member_with_badge(&pool, "B-2", true).await;

    attendance::scan(&pool, &feed, today, "A-1", None).await.unwrap();
    attendance::scan(&pool, &feed, today, "B-2", None).await.unwrap();
    lockup::acquire(&pool, &feed, alice, LockupReason::Manual, None)
        .await
        .unwrap();

    let outcome = dds::accept(&pool, &feed, today, bob, None).await.unwrap();
    assert_eq!(outcome.assignment.status, DdsStatus::Active);
    assert_eq!(outcome.lockup.current_holder_id, Some(bob));

    // A second acceptance for the same day is refused
    let err = dds::accept(&pool, &feed, today, alice, None).await.unwrap_err();
    assert!(matches!(err, DdsError::HeldByOther { member_id, .. } if member_id == bob));

    // Alice no longer holds lockup and may leave
    let left = attendance::scan(&pool, &feed, today, "A-1", None).await.unwrap();
    assert_eq!(left.direction, ScanDirection::Out);

    let mut saw_dds_change = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LiveEvent::DdsChanged { member_id, .. } if member_id == bob) {
            saw_dds_change = true;
        }
    }
    assert!(saw_dds_change);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_dds_transfer_moves_lockup(pool: PgPool) {
    let feed = LiveFeed::default();
    let today = Utc::now().date_naive();

    let alice = member_with_badge(&pool, "A-1", true).await;
    let bob = member_with_badge(&pool, "B-2", true).await;
    attendance::scan(&pool, &feed, today, "A-1", None).await.unwrap();
    attendance::scan(&pool, &feed, today, "B-2", None).await.unwrap();

    dds::accept(&pool, &feed, today, alice, None).await.unwrap();

    let err = dds::transfer(&pool, &feed, today, Some(bob), alice, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DdsError::NotDds(id) if id == bob));

    let outcome = dds::transfer(&pool, &feed, today, Some(alice), bob, Some("shift change"))
        .await
        .unwrap();
    assert_eq!(outcome.assignment.member_id, bob);
    assert_eq!(outcome.lockup.current_holder_id, Some(bob));

    let released = dds::release(&pool, &feed, today, Some(bob), None).await.unwrap();
    assert_eq!(released.assignment.status, DdsStatus::Released);
    assert_eq!(released.lockup.current_holder_id, None);
    assert_eq!(released.lockup.building_status, BuildingStatus::Open);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_unqualified_member_cannot_accept_dds(pool: PgPool) {
    let feed = LiveFeed::default();
    let today = Utc::now().date_naive();
    let carol = member_with_badge(&pool, "C-3", false).await;

    attendance::scan(&pool, &feed, today, "C-3", None).await.unwrap();

    let err = dds::accept(&pool, &feed, today, carol, None).await.unwrap_err();
    assert!(matches!(
        err,
        DdsError::Lockup(LockupError::NotEligible { member_id, .. }) if member_id == carol
    ));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_rollover_closes_previous_day(pool: PgPool) {
    let feed = LiveFeed::default();
    let config = config();
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let alice = member_with_badge(&pool, "A-1", true).await;

    attendance::scan(&pool, &feed, yesterday, "A-1", None).await.unwrap();
    dds::accept(&pool, &feed, yesterday, alice, None).await.unwrap();

    // Pretend the rollover runs a day later
    let stats = rollover::run(&pool, &feed, &config, Utc::now() + Duration::days(1))
        .await
        .unwrap();

    assert_eq!(stats.dds_closed, 1);
    assert_eq!(stats.checkins_closed, 1);
    assert!(stats.lockup_changed);

    let view = lockup::status(&pool).await.unwrap();
    assert_eq!(view.building_status, BuildingStatus::Secured);

    let history = dds::history(&pool, yesterday, yesterday).await.unwrap();
    assert_eq!(history[0].status, DdsStatus::Completed);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_import_commit(pool: PgPool) {
    member_with_badge(&pool, "E-1", false).await;

    let csv = "service_number,rank,first_name,last_name,division,member_type,email\n\
               SN-E-1,PO1,Test,E-1,,,\n\
               N-100,OS,New,Member,Deck,regular,new@example.org\n";

    let preview = import::preview(&pool, csv).await.unwrap();
    assert_eq!(preview.counts.create, 1);
    assert_eq!(preview.counts.update, 1);

    let result = import::commit(&pool, csv).await.unwrap();
    assert_eq!((result.created, result.updated), (1, 1));

    let updated = Member::find_by_service_number(&pool, "SN-E-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.rank, "PO1");

    let again = import::preview(&pool, csv).await.unwrap();
    assert_eq!(again.counts.unchanged, 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_import_with_errors_writes_nothing(pool: PgPool) {
    let csv = "service_number,rank,first_name,last_name\n\
               N-200,OS,Good,Row\n\
               N-201,,Missing,Rank\n";

    let err = import::commit(&pool, csv).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidRows(1)));

    assert!(Member::find_by_service_number(&pool, "N-200")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_visitor_reopens_secured_building(pool: PgPool) {
    let feed = LiveFeed::default();
    assert_eq!(
        lockup::status(&pool).await.unwrap().building_status,
        BuildingStatus::Secured
    );

    let visitor = visitors::sign_in(
        &pool,
        &feed,
        SignInRequest {
            full_name: "Jane Visitor".to_string(),
            organization: Some("Harbour Authority".to_string()),
            visit_reason: None,
            host_member_id: None,
            event_id: None,
            badge_id: None,
        },
        Some("front"),
    )
    .await
    .unwrap();
    assert!(visitor.signed_out_at.is_none());

    let view = lockup::status(&pool).await.unwrap();
    assert_eq!(view.building_status, BuildingStatus::Open);
    assert_eq!(view.current_holder_id, None);
    assert_eq!(view.warning, Some(LockupWarning::Unassigned));

    // Opening the doors is not a change of responsibility
    assert!(lockup::history(&pool, 10, 0).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_transfer_is_audited_in_order(pool: PgPool) {
    let feed = LiveFeed::default();
    let today = Utc::now().date_naive();
    let alice = member_with_badge(&pool, "A-1", true).await;
    let bob = member_with_badge(&pool, "B-2", true).await;
    attendance::scan(&pool, &feed, today, "A-1", None).await.unwrap();
    attendance::scan(&pool, &feed, today, "B-2", None).await.unwrap();

    lockup::acquire(&pool, &feed, alice, LockupReason::Manual, None)
        .await
        .unwrap();
    let view = lockup::transfer(
        &pool,
        &feed,
        TransferCommand {
            from_member_id: Some(alice),
            to_member_id: bob,
            reason: LockupReason::Manual,
            notes: Some("going home"),
        },
    )
    .await
    .unwrap();
    assert_eq!(view.current_holder_id, Some(bob));
    assert_eq!(view.warning, None);

    lockup::release(&pool, &feed, None, LockupReason::AdminOverride, None)
        .await
        .unwrap();

    let history = lockup::history(&pool, 10, 0).await.unwrap();
    let actions: Vec<_> = history.iter().map(|t| t.action).collect();
    assert_eq!(
        actions,
        vec![LockupAction::Release, LockupAction::Transfer, LockupAction::Acquire]
    );

    let transfer = &history[1];
    assert_eq!(transfer.from_member_id, Some(alice));
    assert_eq!(transfer.to_member_id, Some(bob));
    assert_eq!(transfer.reason, LockupReason::Manual);
    assert_eq!(transfer.notes.as_deref(), Some("going home"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_badge_cannot_be_taken_from_its_holder(pool: PgPool) {
    let alice = member_with_badge(&pool, "A-1", false).await;
    let bob = member_with_badge(&pool, "B-2", false).await;

    let badge = Badge::find_by_serial(&pool, "A-1").await.unwrap().unwrap();

    assert!(Badge::assign(&pool, badge.id, bob).await.unwrap().is_none());
    assert!(Badge::assign(&pool, badge.id, alice).await.unwrap().is_some());

    let badge = Badge::find_by_serial(&pool, "A-1").await.unwrap().unwrap();
    assert_eq!(badge.member_id, Some(alice));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_walk_up_supersedes_in_insertion_order(pool: PgPool) {
    let feed = LiveFeed::default();
    let today = Utc::now().date_naive();
    let alice = member_with_badge(&pool, "A-1", true).await;
    let bob = member_with_badge(&pool, "B-2", true).await;
    attendance::scan(&pool, &feed, today, "B-2", None).await.unwrap();

    dds::assign(&pool, &feed, today, alice, today, None).await.unwrap();
    dds::accept(&pool, &feed, today, bob, None).await.unwrap();

    let history = dds::history(&pool, today, today).await.unwrap();
    let rows: Vec<_> = history.iter().map(|a| (a.member_id, a.status)).collect();
    assert_eq!(
        rows,
        vec![(bob, DdsStatus::Active), (alice, DdsStatus::Released)]
    );
}
