//! Duty Day Staff rotation.
//!
//! One member per duty date holds the DDS role. Accepting the role pulls
//! lockup responsibility to the new DDS, handing DDS on carries lockup with it,
//! and releasing DDS releases lockup if the DDS still held it.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    lockup::LockupStatusView, DdsAssignment, DdsStatus, LockupCandidate, LockupReason,
    LockupSnapshot, LockupStatus,
};
use crate::services::live::{LiveEvent, LiveFeed};
use crate::services::lockup::{self, AppliedLockup, LockupError, LockupPlan};

#[derive(thiserror::Error, Debug)]
pub enum DdsError {
    #[error("No active Duty Day Staff for {0}")]
    NoActive(NaiveDate),

    #[error("Member {0} is already the active Duty Day Staff")]
    AlreadyActive(Uuid),

    #[error("Duty Day Staff for {duty_date} is already held by member {member_id}")]
    HeldByOther { member_id: Uuid, duty_date: NaiveDate },

    #[error("Duty Day Staff for {0} is already scheduled")]
    AlreadyScheduled(NaiveDate),

    #[error("Cannot schedule Duty Day Staff for a past date ({0})")]
    PastDate(NaiveDate),

    #[error("Duty Day Staff cannot be handed to the current Duty Day Staff")]
    SameMember,

    #[error("Member {0} is not the active Duty Day Staff")]
    NotDds(Uuid),

    #[error(transparent)]
    Lockup(#[from] LockupError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<DdsError> for AppError {
    fn from(error: DdsError) -> Self {
        let message = error.to_string();
        match error {
            DdsError::PastDate(_) | DdsError::SameMember => AppError::Validation(message),
            DdsError::NotDds(_) => AppError::Forbidden(message),
            DdsError::NoActive(_)
            | DdsError::AlreadyActive(_)
            | DdsError::HeldByOther { .. }
            | DdsError::AlreadyScheduled(_) => AppError::Conflict(message),
            DdsError::Lockup(e) => e.into(),
            DdsError::Database(e) => AppError::Database(e),
        }
    }
}

/// How an acceptance is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPlan {
    /// Pending assignment to activate; `None` records a walk-up acceptance
    pub activate: Option<Uuid>,
    /// Other members' pending assignments for the day, released as superseded
    pub supersede: Vec<Uuid>,
}

/// `open` holds the pending and active assignments for the duty date.
pub fn plan_accept(open: &[DdsAssignment], member_id: Uuid) -> Result<AcceptPlan, DdsError> {
    if let Some(active) = open.iter().find(|a| a.status == DdsStatus::Active) {
        return Err(if active.member_id == member_id {
            DdsError::AlreadyActive(member_id)
        } else {
            DdsError::HeldByOther {
                member_id: active.member_id,
                duty_date: active.duty_date,
            }
        });
    }

    let activate = open
        .iter()
        .find(|a| a.status == DdsStatus::Pending && a.member_id == member_id)
        .map(|a| a.id);

    let supersede = open
        .iter()
        .filter(|a| a.status == DdsStatus::Pending && a.member_id != member_id)
        .map(|a| a.id)
        .collect();

    Ok(AcceptPlan {
        activate,
        supersede,
    })
}

fn find_active(open: &[DdsAssignment], duty_date: NaiveDate) -> Result<&DdsAssignment, DdsError> {
    open.iter()
        .find(|a| a.status == DdsStatus::Active)
        .ok_or(DdsError::NoActive(duty_date))
}

fn authorize(active: &DdsAssignment, actor: Option<Uuid>) -> Result<(), DdsError> {
    match actor {
        Some(actor) if actor != active.member_id => Err(DdsError::NotDds(actor)),
        _ => Ok(()),
    }
}

/// Returns the assignment being handed over. `actor` is `None` for administrators.
pub fn plan_transfer<'a>(
    open: &'a [DdsAssignment],
    duty_date: NaiveDate,
    actor: Option<Uuid>,
    to_member_id: Uuid,
) -> Result<&'a DdsAssignment, DdsError> {
    let active = find_active(open, duty_date)?;
    authorize(active, actor)?;

    if active.member_id == to_member_id {
        return Err(DdsError::SameMember);
    }

    Ok(active)
}

pub fn plan_release<'a>(
    open: &'a [DdsAssignment],
    duty_date: NaiveDate,
    actor: Option<Uuid>,
) -> Result<&'a DdsAssignment, DdsError> {
    let active = find_active(open, duty_date)?;
    authorize(active, actor)?;
    Ok(active)
}

pub fn plan_assign(
    open: &[DdsAssignment],
    duty_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), DdsError> {
    if duty_date < today {
        return Err(DdsError::PastDate(duty_date));
    }
    if !open.is_empty() {
        return Err(DdsError::AlreadyScheduled(duty_date));
    }
    Ok(())
}

/// Lockup follows DDS on handoff: it moves from the outgoing DDS, or is
/// picked up when nobody holds it. A third party's lockup is left alone.
pub fn plan_lockup_handoff(
    current: LockupSnapshot,
    outgoing: Uuid,
    incoming: &LockupCandidate,
) -> Result<Option<LockupPlan>, LockupError> {
    match current.holder_id {
        Some(holder) if holder == outgoing => lockup::plan_transfer(
            current,
            Some(outgoing),
            incoming,
            LockupReason::DdsHandoff,
        )
        .map(Some),
        None => lockup::plan_acquire(current, incoming, LockupReason::DdsHandoff),
        Some(_) => Ok(None),
    }
}

/// Scheduling does not require presence, only an active qualified member.
fn check_schedulable(candidate: &LockupCandidate) -> Result<(), LockupError> {
    lockup::check_eligible(&LockupCandidate {
        is_present: true,
        ..*candidate
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DdsToday {
    pub duty_date: NaiveDate,
    pub active: Option<DdsAssignment>,
    pub pending: Vec<DdsAssignment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DdsOutcome {
    pub assignment: DdsAssignment,
    pub lockup: LockupStatusView,
}

async fn apply_lockup(
    conn: &mut PgConnection,
    plan: Option<LockupPlan>,
    notes: Option<&str>,
) -> Result<Option<AppliedLockup>, sqlx::Error> {
    match plan {
        Some(plan) => Ok(Some(lockup::apply_plan(conn, &plan, notes).await?)),
        None => Ok(None),
    }
}

fn publish(feed: &LiveFeed, assignment: &DdsAssignment, applied: Option<&AppliedLockup>) {
    feed.publish(LiveEvent::DdsChanged {
        duty_date: assignment.duty_date,
        member_id: assignment.member_id,
        status: assignment.status,
        at: Utc::now(),
    });

    if let Some(applied) = applied {
        applied.publish(feed);
    }
}

pub async fn today(pool: &PgPool, duty_date: NaiveDate) -> Result<DdsToday, DdsError> {
    let open = DdsAssignment::list_open_for_date(pool, duty_date).await?;

    let (active, pending): (Vec<_>, Vec<_>) = open
        .into_iter()
        .partition(|a| a.status == DdsStatus::Active);

    Ok(DdsToday {
        duty_date,
        active: active.into_iter().next(),
        pending,
    })
}

pub async fn history(
    pool: &PgPool,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DdsAssignment>, DdsError> {
    Ok(DdsAssignment::list_between(pool, from, to).await?)
}

pub async fn assign(
    pool: &PgPool,
    feed: &LiveFeed,
    today: NaiveDate,
    member_id: Uuid,
    duty_date: NaiveDate,
    notes: Option<&str>,
) -> Result<DdsAssignment, DdsError> {
    let mut tx = pool.begin().await?;

    // Serializes scheduling with accept/transfer/release
    LockupStatus::lock(&mut *tx).await?;

    let candidate = lockup::load_candidate(&mut tx, member_id).await?;
    check_schedulable(&candidate)?;

    let open = DdsAssignment::list_open_for_date(&mut *tx, duty_date).await?;
    plan_assign(&open, duty_date, today)?;

    let assignment =
        DdsAssignment::create(&mut *tx, member_id, duty_date, DdsStatus::Pending, notes).await?;
    tx.commit().await?;

    tracing::info!(
        assignment_id = %assignment.id,
        member_id = %member_id,
        duty_date = %duty_date,
        "Duty Day Staff scheduled"
    );

    publish(feed, &assignment, None);
    Ok(assignment)
}

pub async fn accept(
    pool: &PgPool,
    feed: &LiveFeed,
    duty_date: NaiveDate,
    member_id: Uuid,
    notes: Option<&str>,
) -> Result<DdsOutcome, DdsError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let candidate = lockup::load_candidate(&mut tx, member_id).await?;
    lockup::check_eligible(&candidate)?;

    let open = DdsAssignment::list_open_for_date(&mut *tx, duty_date).await?;
    let plan = plan_accept(&open, member_id)?;

    for superseded in &plan.supersede {
        DdsAssignment::finish(
            &mut *tx,
            *superseded,
            DdsStatus::Released,
            None,
            Some("superseded by walk-up acceptance"),
        )
        .await?;
    }

    let assignment = match plan.activate {
        Some(id) => DdsAssignment::activate(&mut *tx, id).await?,
        None => {
            DdsAssignment::create(&mut *tx, member_id, duty_date, DdsStatus::Active, notes).await?
        }
    };

    let lockup_plan = lockup::plan_acquire(current, &candidate, LockupReason::DdsHandoff)?;
    let applied = apply_lockup(&mut tx, lockup_plan, notes).await?;

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    tracing::info!(
        assignment_id = %assignment.id,
        member_id = %member_id,
        duty_date = %duty_date,
        walk_up = plan.activate.is_none(),
        superseded = plan.supersede.len(),
        "Duty Day Staff accepted"
    );

    publish(feed, &assignment, applied.as_ref());

    Ok(DdsOutcome {
        assignment,
        lockup: view,
    })
}

pub async fn transfer(
    pool: &PgPool,
    feed: &LiveFeed,
    duty_date: NaiveDate,
    actor: Option<Uuid>,
    to_member_id: Uuid,
    notes: Option<&str>,
) -> Result<DdsOutcome, DdsError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let incoming = lockup::load_candidate(&mut tx, to_member_id).await?;
    lockup::check_eligible(&incoming)?;

    let open = DdsAssignment::list_open_for_date(&mut *tx, duty_date).await?;
    let outgoing = plan_transfer(&open, duty_date, actor, to_member_id)?;
    let outgoing_member = outgoing.member_id;

    DdsAssignment::finish(
        &mut *tx,
        outgoing.id,
        DdsStatus::Transferred,
        Some(to_member_id),
        notes,
    )
    .await?;

    // A pending row for the incoming member would otherwise linger
    for pending in open
        .iter()
        .filter(|a| a.status == DdsStatus::Pending && a.member_id == to_member_id)
    {
        DdsAssignment::finish(&mut *tx, pending.id, DdsStatus::Released, None, None).await?;
    }

    let assignment =
        DdsAssignment::create(&mut *tx, to_member_id, duty_date, DdsStatus::Active, notes).await?;

    let lockup_plan = plan_lockup_handoff(current, outgoing_member, &incoming)?;
    let applied = apply_lockup(&mut tx, lockup_plan, notes).await?;

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    tracing::info!(
        from_member_id = %outgoing_member,
        to_member_id = %to_member_id,
        duty_date = %duty_date,
        lockup_moved = applied.is_some(),
        "Duty Day Staff transferred"
    );

    publish(feed, &assignment, applied.as_ref());

    Ok(DdsOutcome {
        assignment,
        lockup: view,
    })
}

pub async fn release(
    pool: &PgPool,
    feed: &LiveFeed,
    duty_date: NaiveDate,
    actor: Option<Uuid>,
    notes: Option<&str>,
) -> Result<DdsOutcome, DdsError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let open = DdsAssignment::list_open_for_date(&mut *tx, duty_date).await?;
    let active = plan_release(&open, duty_date, actor)?;

    let assignment =
        DdsAssignment::finish(&mut *tx, active.id, DdsStatus::Released, None, notes).await?;

    let lockup_plan = if current.is_held_by(assignment.member_id) {
        lockup::plan_release(current, Some(assignment.member_id), LockupReason::DdsRelease)?
    } else {
        None
    };
    let applied = apply_lockup(&mut tx, lockup_plan, notes).await?;

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    tracing::info!(
        member_id = %assignment.member_id,
        duty_date = %duty_date,
        lockup_released = applied.is_some(),
        "Duty Day Staff released"
    );

    publish(feed, &assignment, applied.as_ref());

    Ok(DdsOutcome {
        assignment,
        lockup: view,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LockupAction;

    fn assignment(member_id: Uuid, status: DdsStatus) -> DdsAssignment {
        DdsAssignment {
            id: Uuid::new_v4(),
            member_id,
            duty_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            status,
            accepted_at: None,
            ended_at: None,
            transferred_to_id: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn eligible(member_id: Uuid) -> LockupCandidate {
        LockupCandidate {
            member_id,
            is_active: true,
            is_present: true,
            is_qualified: true,
        }
    }

    fn duty_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn test_accept_scheduled_assignment() {
        let member = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mine = assignment(member, DdsStatus::Pending);
        let theirs = assignment(other, DdsStatus::Pending);

        let plan = plan_accept(&[theirs.clone(), mine.clone()], member).unwrap();

        assert_eq!(plan.activate, Some(mine.id));
        assert_eq!(plan.supersede, vec![theirs.id]);
    }

    #[test]
    fn test_accept_walk_up() {
        let plan = plan_accept(&[], Uuid::new_v4()).unwrap();

        assert_eq!(plan.activate, None);
        assert!(plan.supersede.is_empty());
    }

    #[test]
    fn test_accept_when_active_exists() {
        let member = Uuid::new_v4();
        let other = Uuid::new_v4();

        let open = [assignment(other, DdsStatus::Active)];
        assert!(matches!(
            plan_accept(&open, member),
            Err(DdsError::HeldByOther { member_id, .. }) if member_id == other
        ));

        let open = [assignment(member, DdsStatus::Active)];
        assert!(matches!(
            plan_accept(&open, member),
            Err(DdsError::AlreadyActive(id)) if id == member
        ));
    }

    #[test]
    fn test_transfer_and_release_require_active() {
        let member = Uuid::new_v4();
        let open = [assignment(member, DdsStatus::Pending)];

        assert!(matches!(
            plan_transfer(&open, duty_date(), None, Uuid::new_v4()),
            Err(DdsError::NoActive(_))
        ));
        assert!(matches!(
            plan_release(&open, duty_date(), Some(member)),
            Err(DdsError::NoActive(_))
        ));
    }

    #[test]
    fn test_transfer_authorization() {
        let dds = Uuid::new_v4();
        let next = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let open = [assignment(dds, DdsStatus::Active)];

        assert_eq!(
            plan_transfer(&open, duty_date(), Some(dds), next).unwrap().member_id,
            dds
        );
        // Administrators act without a member identity
        assert!(plan_transfer(&open, duty_date(), None, next).is_ok());
        assert!(matches!(
            plan_transfer(&open, duty_date(), Some(stranger), next),
            Err(DdsError::NotDds(id)) if id == stranger
        ));
        assert!(matches!(
            plan_transfer(&open, duty_date(), Some(dds), dds),
            Err(DdsError::SameMember)
        ));
    }

    #[test]
    fn test_assign_rules() {
        let today = duty_date();
        let yesterday = today.pred_opt().unwrap();

        assert!(plan_assign(&[], today, today).is_ok());
        assert!(matches!(
            plan_assign(&[], yesterday, today),
            Err(DdsError::PastDate(d)) if d == yesterday
        ));
        assert!(matches!(
            plan_assign(&[assignment(Uuid::new_v4(), DdsStatus::Pending)], today, today),
            Err(DdsError::AlreadyScheduled(_))
        ));
    }

    #[test]
    fn test_lockup_follows_dds_handoff() {
        let outgoing = Uuid::new_v4();
        let incoming = Uuid::new_v4();

        let plan = plan_lockup_handoff(
            LockupSnapshot::held_by(outgoing),
            outgoing,
            &eligible(incoming),
        )
        .unwrap()
        .unwrap();
        assert_eq!(plan.action, LockupAction::Transfer);
        assert_eq!(plan.reason, LockupReason::DdsHandoff);
        assert_eq!(plan.from_member_id, Some(outgoing));
        assert_eq!(plan.to_member_id, Some(incoming));

        let plan = plan_lockup_handoff(LockupSnapshot::secured(), outgoing, &eligible(incoming))
            .unwrap()
            .unwrap();
        assert_eq!(plan.action, LockupAction::Acquire);

        let third_party = Uuid::new_v4();
        assert!(plan_lockup_handoff(
            LockupSnapshot::held_by(third_party),
            outgoing,
            &eligible(incoming)
        )
        .unwrap()
        .is_none());
    }

    #[test]
    fn test_schedulable_ignores_presence() {
        let mut candidate = eligible(Uuid::new_v4());
        candidate.is_present = false;
        assert!(check_schedulable(&candidate).is_ok());

        candidate.is_qualified = false;
        assert!(check_schedulable(&candidate).is_err());
    }
}
