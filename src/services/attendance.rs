use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    checkin::CheckinFilter, lockup::LockupStatusView, Badge, BadgeStatus, BuildingStatus, Checkin,
    CheckoutMethod, DdsAssignment, DdsStatus, LockupSnapshot, LockupStatus, Member, MemberSummary,
    PresentMember, Visitor,
};
use crate::services::live::{LiveEvent, LiveFeed};
use crate::services::lockup::{self, LockupError};

#[derive(thiserror::Error, Debug)]
pub enum AttendanceError {
    #[error("Unknown badge: {0}")]
    UnknownBadge(String),

    #[error("Badge {serial} is not active ({status:?})")]
    BadgeNotActive { serial: String, status: BadgeStatus },

    #[error("Badge {0} is not assigned to a member")]
    BadgeUnassigned(String),

    #[error("Member not found: {0}")]
    MemberNotFound(Uuid),

    #[error("Member {0} is not active")]
    MemberInactive(Uuid),

    #[error("Member {0} is not checked in")]
    NotCheckedIn(Uuid),

    #[error(transparent)]
    Lockup(#[from] LockupError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<AttendanceError> for AppError {
    fn from(error: AttendanceError) -> Self {
        let message = error.to_string();
        match error {
            AttendanceError::UnknownBadge(_) | AttendanceError::MemberNotFound(_) => {
                AppError::NotFound(message)
            }
            AttendanceError::BadgeNotActive { .. }
            | AttendanceError::BadgeUnassigned(_)
            | AttendanceError::MemberInactive(_) => AppError::Forbidden(message),
            AttendanceError::NotCheckedIn(_) => AppError::Conflict(message),
            AttendanceError::Lockup(e) => e.into(),
            AttendanceError::Database(e) => AppError::Database(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    In,
    Out,
}

/// Extra information the kiosk shows alongside a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanNotice {
    /// First arrival after lockup; nobody holds lockup yet
    BuildingOpened,
    /// Member is scheduled as today's DDS and has not accepted yet
    DdsPending,
    /// Member is today's active DDS
    IsDds,
    /// Member holds lockup
    HoldsLockup,
    /// Today's active DDS is leaving without handing over or releasing DDS
    DdsLeaving,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub direction: ScanDirection,
    pub member: MemberSummary,
    pub checkin: Checkin,
    pub notices: Vec<ScanNotice>,
}

/// Maps a scanned badge to the member it identifies.
pub fn resolve_badge(badge: &Badge) -> Result<Uuid, AttendanceError> {
    if badge.status != BadgeStatus::Active {
        return Err(AttendanceError::BadgeNotActive {
            serial: badge.serial_number.clone(),
            status: badge.status,
        });
    }

    badge
        .member_id
        .ok_or_else(|| AttendanceError::BadgeUnassigned(badge.serial_number.clone()))
}

/// A scan toggles presence; leaving is subject to the lockup checkout guard.
pub fn plan_scan(
    current: LockupSnapshot,
    member_id: Uuid,
    is_checked_in: bool,
) -> Result<ScanDirection, AttendanceError> {
    if is_checked_in {
        lockup::guard_checkout(current, member_id)?;
        Ok(ScanDirection::Out)
    } else {
        Ok(ScanDirection::In)
    }
}

/// The first arrival into a secured building reopens it without a holder.
pub fn reopened(current: LockupSnapshot) -> Option<LockupSnapshot> {
    (current.building_status == BuildingStatus::Secured).then(LockupSnapshot::open_unassigned)
}

pub fn scan_notices(
    direction: ScanDirection,
    building_opened: bool,
    current: LockupSnapshot,
    member_id: Uuid,
    todays_dds: &[DdsAssignment],
) -> Vec<ScanNotice> {
    let mut notices = Vec::new();
    let own_dds = todays_dds.iter().find(|a| a.member_id == member_id);

    if direction == ScanDirection::Out {
        if own_dds.is_some_and(|a| a.status == DdsStatus::Active) {
            notices.push(ScanNotice::DdsLeaving);
        }
        return notices;
    }

    if building_opened {
        notices.push(ScanNotice::BuildingOpened);
    }

    if let Some(assignment) = own_dds {
        match assignment.status {
            DdsStatus::Pending => notices.push(ScanNotice::DdsPending),
            DdsStatus::Active => notices.push(ScanNotice::IsDds),
            _ => {}
        }
    }

    if current.is_held_by(member_id) {
        notices.push(ScanNotice::HoldsLockup);
    }

    notices
}

#[tracing::instrument(skip(pool, feed), fields(badge = %serial_number))]
pub async fn scan(
    pool: &PgPool,
    feed: &LiveFeed,
    duty_date: NaiveDate,
    serial_number: &str,
    kiosk_id: Option<&str>,
) -> Result<ScanResult, AttendanceError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();

    let badge = Badge::find_by_serial(&mut *tx, serial_number)
        .await?
        .ok_or_else(|| AttendanceError::UnknownBadge(serial_number.to_string()))?;
    let member_id = resolve_badge(&badge)?;

    let member = Member::find_by_id(&mut *tx, member_id)
        .await?
        .ok_or(AttendanceError::MemberNotFound(member_id))?;
    if !member.is_active() {
        return Err(AttendanceError::MemberInactive(member_id));
    }

    let open = Checkin::find_open_for_member(&mut *tx, member_id).await?;
    let direction = plan_scan(current, member_id, open.is_some())?;

    let mut building_opened = false;
    let checkin = match open {
        Some(open) => Checkin::close(&mut *tx, open.id, CheckoutMethod::Kiosk).await?,
        None => {
            if let Some(next) = reopened(current) {
                LockupStatus::store(&mut *tx, next).await?;
                building_opened = true;
            }
            Checkin::create(&mut *tx, member_id, Some(badge.id), kiosk_id).await?
        }
    };

    let todays_dds = DdsAssignment::list_open_for_date(&mut *tx, duty_date).await?;
    tx.commit().await?;

    let notices = scan_notices(direction, building_opened, current, member_id, &todays_dds);
    let summary = member.summary();

    tracing::info!(
        member_id = %member_id,
        direction = ?direction,
        kiosk_id = ?kiosk_id,
        ?notices,
        "Badge scanned"
    );

    let at = Utc::now();
    match direction {
        ScanDirection::In => feed.publish(LiveEvent::CheckedIn {
            member: summary.clone(),
            kiosk_id: kiosk_id.map(str::to_string),
            at,
        }),
        ScanDirection::Out => feed.publish(LiveEvent::CheckedOut {
            member: summary.clone(),
            at,
        }),
    }

    Ok(ScanResult {
        direction,
        member: summary,
        checkin,
        notices,
    })
}

/// Checks a member out from the dashboard. The lockup guard still applies.
pub async fn admin_checkout(
    pool: &PgPool,
    feed: &LiveFeed,
    member_id: Uuid,
) -> Result<Checkin, AttendanceError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let member = Member::find_by_id(&mut *tx, member_id)
        .await?
        .ok_or(AttendanceError::MemberNotFound(member_id))?;

    let open = Checkin::find_open_for_member(&mut *tx, member_id)
        .await?
        .ok_or(AttendanceError::NotCheckedIn(member_id))?;
    lockup::guard_checkout(current, member_id)?;

    let checkin = Checkin::close(&mut *tx, open.id, CheckoutMethod::Admin).await?;
    tx.commit().await?;

    tracing::info!(member_id = %member_id, "Member checked out by administrator");

    feed.publish(LiveEvent::CheckedOut {
        member: member.summary(),
        at: checkin.checked_out_at.unwrap_or_else(Utc::now),
    });

    Ok(checkin)
}

#[derive(Debug, Clone, Serialize)]
pub struct Presence {
    pub member_count: usize,
    pub visitor_count: usize,
    pub members: Vec<PresentMember>,
    pub visitors: Vec<Visitor>,
    pub lockup: LockupStatusView,
    pub dds: Option<DdsAssignment>,
    pub generated_at: DateTime<Utc>,
}

pub async fn presence(pool: &PgPool, duty_date: NaiveDate) -> Result<Presence, AttendanceError> {
    let members = Checkin::list_present(pool).await?;
    let visitors = Visitor::list_current(pool).await?;
    let lockup = LockupStatus::fetch_view(pool).await?;
    let dds = DdsAssignment::list_open_for_date(pool, duty_date)
        .await?
        .into_iter()
        .find(|a| a.status == DdsStatus::Active);

    Ok(Presence {
        member_count: members.len(),
        visitor_count: visitors.len(),
        members,
        visitors,
        lockup,
        dds,
        generated_at: Utc::now(),
    })
}

pub async fn history(pool: &PgPool, filter: &CheckinFilter) -> Result<Vec<Checkin>, AttendanceError> {
    Ok(Checkin::list(pool, filter).await?)
}
