//! Building lockup responsibility.
//!
//! Exactly one row (`lockup_status.id = 1`) records whether the building is
//! secured and which member, if any, is responsible for locking it up. Every
//! change is decided by a pure `plan_*` function over a [`LockupSnapshot`] and
//! then applied inside the caller's transaction while the status row is
//! locked, together with its `lockup_transfers` audit row.
//!
//! State space:
//!
//! | building | holder | meaning                                   |
//! |----------|--------|-------------------------------------------|
//! | secured  | none   | locked up, nobody inside is responsible   |
//! | open     | some   | normal operation                          |
//! | open     | none   | people inside but responsibility unowned  |

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    lockup::{LockupStatusView, NewLockupTransfer},
    BuildingStatus, Checkin, CheckoutMethod, LockupAction, LockupCandidate, LockupReason,
    LockupSnapshot, LockupStatus, LockupTransfer, Visitor,
};
use crate::services::live::{LiveEvent, LiveFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    Inactive,
    NotCheckedIn,
    NotQualified,
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Ineligibility::Inactive => "member is not active",
            Ineligibility::NotCheckedIn => "member is not checked in",
            Ineligibility::NotQualified => "member has no current lockup qualification",
        };
        f.write_str(text)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LockupError {
    #[error("Member not found: {0}")]
    MemberNotFound(Uuid),

    #[error("Member {member_id} cannot hold lockup: {reason}")]
    NotEligible {
        member_id: Uuid,
        reason: Ineligibility,
    },

    #[error("Lockup is already held by member {holder_id}")]
    HeldByOther { holder_id: Uuid },

    #[error("Member {0} does not hold lockup")]
    NotHolder(Uuid),

    #[error("Only the current lockup holder can do this")]
    MissingActor,

    #[error("Nobody currently holds lockup")]
    NoHolder,

    #[error("Lockup cannot be transferred to its current holder")]
    SameMember,

    #[error("Building is already secured")]
    AlreadySecured,

    #[error("Member {0} holds lockup; transfer lockup or execute lockup before checking out")]
    HoldsLockup(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LockupError> for AppError {
    fn from(error: LockupError) -> Self {
        let message = error.to_string();
        match error {
            LockupError::MemberNotFound(_) => AppError::NotFound(message),
            LockupError::NotEligible { .. } | LockupError::SameMember => {
                AppError::Validation(message)
            }
            LockupError::MissingActor | LockupError::NotHolder(_) => AppError::Forbidden(message),
            LockupError::HeldByOther { .. }
            | LockupError::NoHolder
            | LockupError::AlreadySecured
            | LockupError::HoldsLockup(_) => AppError::Conflict(message),
            LockupError::Database(e) => AppError::Database(e),
        }
    }
}

/// A decided state change, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockupPlan {
    pub action: LockupAction,
    pub reason: LockupReason,
    pub from_member_id: Option<Uuid>,
    pub to_member_id: Option<Uuid>,
    pub next: LockupSnapshot,
    /// Securing the building closes all open attendance
    pub closes_building: bool,
}

pub fn check_eligible(candidate: &LockupCandidate) -> Result<(), LockupError> {
    let reason = if !candidate.is_active {
        Ineligibility::Inactive
    } else if !candidate.is_present {
        Ineligibility::NotCheckedIn
    } else if !candidate.is_qualified {
        Ineligibility::NotQualified
    } else {
        return Ok(());
    };

    Err(LockupError::NotEligible {
        member_id: candidate.member_id,
        reason,
    })
}

fn may_take_over(reason: LockupReason) -> bool {
    matches!(reason, LockupReason::AdminOverride | LockupReason::DdsHandoff)
}

/// Decides whether `actor` may act on behalf of `holder`.
fn authorize(holder: Uuid, actor: Option<Uuid>, reason: LockupReason) -> Result<(), LockupError> {
    if reason == LockupReason::AdminOverride {
        return Ok(());
    }

    match actor {
        Some(actor) if actor == holder => Ok(()),
        Some(actor) => Err(LockupError::NotHolder(actor)),
        None => Err(LockupError::MissingActor),
    }
}

/// `Ok(None)` when the candidate already holds lockup.
pub fn plan_acquire(
    current: LockupSnapshot,
    candidate: &LockupCandidate,
    reason: LockupReason,
) -> Result<Option<LockupPlan>, LockupError> {
    check_eligible(candidate)?;

    let member_id = candidate.member_id;
    match current.holder_id {
        Some(holder_id) if holder_id == member_id => Ok(None),
        Some(holder_id) if may_take_over(reason) => Ok(Some(LockupPlan {
            action: LockupAction::Transfer,
            reason,
            from_member_id: Some(holder_id),
            to_member_id: Some(member_id),
            next: LockupSnapshot::held_by(member_id),
            closes_building: false,
        })),
        Some(holder_id) => Err(LockupError::HeldByOther { holder_id }),
        None => Ok(Some(LockupPlan {
            action: LockupAction::Acquire,
            reason,
            from_member_id: None,
            to_member_id: Some(member_id),
            next: LockupSnapshot::held_by(member_id),
            closes_building: false,
        })),
    }
}

pub fn plan_transfer(
    current: LockupSnapshot,
    actor: Option<Uuid>,
    to: &LockupCandidate,
    reason: LockupReason,
) -> Result<LockupPlan, LockupError> {
    let holder_id = current.holder_id.ok_or(LockupError::NoHolder)?;
    authorize(holder_id, actor, reason)?;

    if to.member_id == holder_id {
        return Err(LockupError::SameMember);
    }
    check_eligible(to)?;

    Ok(LockupPlan {
        action: LockupAction::Transfer,
        reason,
        from_member_id: Some(holder_id),
        to_member_id: Some(to.member_id),
        next: LockupSnapshot::held_by(to.member_id),
        closes_building: false,
    })
}

/// Clears the holder while leaving the building open. `Ok(None)` when nobody holds it.
pub fn plan_release(
    current: LockupSnapshot,
    actor: Option<Uuid>,
    reason: LockupReason,
) -> Result<Option<LockupPlan>, LockupError> {
    let Some(holder_id) = current.holder_id else {
        return Ok(None);
    };
    authorize(holder_id, actor, reason)?;

    Ok(Some(LockupPlan {
        action: LockupAction::Release,
        reason,
        from_member_id: Some(holder_id),
        to_member_id: None,
        next: LockupSnapshot::open_unassigned(),
        closes_building: false,
    }))
}

pub fn plan_execute(
    current: LockupSnapshot,
    actor: Option<Uuid>,
    override_holder: bool,
) -> Result<LockupPlan, LockupError> {
    if current.building_status == BuildingStatus::Secured {
        return Err(LockupError::AlreadySecured);
    }

    let reason = if override_holder {
        LockupReason::AdminOverride
    } else {
        let holder_id = current.holder_id.ok_or(LockupError::NoHolder)?;
        authorize(holder_id, actor, LockupReason::LockupExecuted)?;
        LockupReason::LockupExecuted
    };

    Ok(LockupPlan {
        action: LockupAction::Execute,
        reason,
        from_member_id: current.holder_id,
        to_member_id: None,
        next: LockupSnapshot::secured(),
        closes_building: true,
    })
}

/// The holder may not leave without handing lockup on or locking up.
pub fn guard_checkout(current: LockupSnapshot, member_id: Uuid) -> Result<(), LockupError> {
    if current.is_held_by(member_id) {
        return Err(LockupError::HoldsLockup(member_id));
    }
    Ok(())
}

/// Result of writing a [`LockupPlan`].
#[derive(Debug, Clone)]
pub struct AppliedLockup {
    pub status: LockupStatus,
    pub transfer: LockupTransfer,
    pub closed_checkins: Vec<Uuid>,
    pub closed_visits: Vec<Uuid>,
}

impl AppliedLockup {
    pub fn publish(&self, feed: &LiveFeed) {
        let at = self.transfer.performed_at;

        if !self.closed_checkins.is_empty() || !self.closed_visits.is_empty() {
            feed.publish(LiveEvent::BulkCheckout {
                members: self.closed_checkins.len(),
                visitors: self.closed_visits.len(),
                at,
            });
        }

        feed.publish(LiveEvent::LockupChanged {
            action: self.transfer.action,
            reason: self.transfer.reason,
            building_status: self.status.building_status,
            holder_id: self.status.current_holder_id,
            at,
        });
    }
}

pub(crate) async fn load_candidate(
    conn: &mut PgConnection,
    member_id: Uuid,
) -> Result<LockupCandidate, LockupError> {
    LockupCandidate::load(conn, member_id, Utc::now())
        .await?
        .ok_or(LockupError::MemberNotFound(member_id))
}

/// Writes a plan. The caller must hold the status row lock.
pub(crate) async fn apply_plan(
    conn: &mut PgConnection,
    plan: &LockupPlan,
    notes: Option<&str>,
) -> Result<AppliedLockup, sqlx::Error> {
    let (closed_checkins, closed_visits) = if plan.closes_building {
        let members = Checkin::close_all_open(&mut *conn, CheckoutMethod::Lockup).await?;
        let visitors = Visitor::sign_out_all(&mut *conn).await?;
        (members, visitors)
    } else {
        (Vec::new(), Vec::new())
    };

    let status = LockupStatus::store(&mut *conn, plan.next).await?;
    let transfer = LockupTransfer::create(
        &mut *conn,
        NewLockupTransfer {
            from_member_id: plan.from_member_id,
            to_member_id: plan.to_member_id,
            action: plan.action,
            reason: plan.reason,
            notes: notes.map(str::to_string),
        },
    )
    .await?;

    tracing::info!(
        action = ?plan.action,
        reason = ?plan.reason,
        from_member_id = ?plan.from_member_id,
        to_member_id = ?plan.to_member_id,
        building_status = ?status.building_status,
        closed_checkins = closed_checkins.len(),
        closed_visits = closed_visits.len(),
        "Lockup state changed"
    );

    Ok(AppliedLockup {
        status,
        transfer,
        closed_checkins,
        closed_visits,
    })
}

pub async fn status(pool: &PgPool) -> Result<LockupStatusView, LockupError> {
    Ok(LockupStatus::fetch_view(pool).await?)
}

pub async fn history(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<LockupTransfer>, LockupError> {
    Ok(LockupTransfer::list_recent(pool, limit, offset).await?)
}

pub async fn acquire(
    pool: &PgPool,
    feed: &LiveFeed,
    member_id: Uuid,
    reason: LockupReason,
    notes: Option<&str>,
) -> Result<LockupStatusView, LockupError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let candidate = load_candidate(&mut tx, member_id).await?;

    let applied = match plan_acquire(current, &candidate, reason)? {
        Some(plan) => Some(apply_plan(&mut tx, &plan, notes).await?),
        None => None,
    };

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    if let Some(applied) = applied {
        applied.publish(feed);
    }

    Ok(view)
}

#[derive(Debug, Clone)]
pub struct TransferCommand<'a> {
    /// Member handing over; `None` only for admin override
    pub from_member_id: Option<Uuid>,
    pub to_member_id: Uuid,
    pub reason: LockupReason,
    pub notes: Option<&'a str>,
}

pub async fn transfer(
    pool: &PgPool,
    feed: &LiveFeed,
    command: TransferCommand<'_>,
) -> Result<LockupStatusView, LockupError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let to = load_candidate(&mut tx, command.to_member_id).await?;
    let plan = plan_transfer(current, command.from_member_id, &to, command.reason)?;
    let applied = apply_plan(&mut tx, &plan, command.notes).await?;

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    applied.publish(feed);
    Ok(view)
}

pub async fn release(
    pool: &PgPool,
    feed: &LiveFeed,
    actor: Option<Uuid>,
    reason: LockupReason,
    notes: Option<&str>,
) -> Result<LockupStatusView, LockupError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let applied = match plan_release(current, actor, reason)? {
        Some(plan) => Some(apply_plan(&mut tx, &plan, notes).await?),
        None => None,
    };

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    if let Some(applied) = applied {
        applied.publish(feed);
    }

    Ok(view)
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub status: LockupStatusView,
    pub members_checked_out: usize,
    pub visitors_signed_out: usize,
}

pub async fn execute(
    pool: &PgPool,
    feed: &LiveFeed,
    actor: Option<Uuid>,
    override_holder: bool,
    notes: Option<&str>,
) -> Result<ExecuteOutcome, LockupError> {
    let mut tx = pool.begin().await?;

    let current = LockupStatus::lock(&mut *tx).await?.snapshot();
    let plan = plan_execute(current, actor, override_holder)?;
    let applied = apply_plan(&mut tx, &plan, notes).await?;

    let view = LockupStatus::fetch_view(&mut *tx).await?;
    tx.commit().await?;

    applied.publish(feed);

    Ok(ExecuteOutcome {
        status: view,
        members_checked_out: applied.closed_checkins.len(),
        visitors_signed_out: applied.closed_visits.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible(member_id: Uuid) -> LockupCandidate {
        LockupCandidate {
            member_id,
            is_active: true,
            is_present: true,
            is_qualified: true,
        }
    }

    #[test]
    fn test_eligibility_reasons_in_order() {
        let member_id = Uuid::new_v4();

        let mut candidate = eligible(member_id);
        candidate.is_active = false;
        candidate.is_present = false;
        assert!(matches!(
            check_eligible(&candidate),
            Err(LockupError::NotEligible { reason: Ineligibility::Inactive, .. })
        ));

        let mut candidate = eligible(member_id);
        candidate.is_present = false;
        assert!(matches!(
            check_eligible(&candidate),
            Err(LockupError::NotEligible { reason: Ineligibility::NotCheckedIn, .. })
        ));

        let mut candidate = eligible(member_id);
        candidate.is_qualified = false;
        assert!(matches!(
            check_eligible(&candidate),
            Err(LockupError::NotEligible { reason: Ineligibility::NotQualified, .. })
        ));

        assert!(check_eligible(&eligible(member_id)).is_ok());
    }

    #[test]
    fn test_acquire_free_lockup_opens_building() {
        let member_id = Uuid::new_v4();

        let plan = plan_acquire(
            LockupSnapshot::secured(),
            &eligible(member_id),
            LockupReason::Manual,
        )
        .unwrap()
        .unwrap();

        assert_eq!(plan.action, LockupAction::Acquire);
        assert_eq!(plan.from_member_id, None);
        assert_eq!(plan.next, LockupSnapshot::held_by(member_id));
        assert!(!plan.closes_building);
    }

    #[test]
    fn test_acquire_by_current_holder_is_noop() {
        let member_id = Uuid::new_v4();

        let plan = plan_acquire(
            LockupSnapshot::held_by(member_id),
            &eligible(member_id),
            LockupReason::Manual,
        )
        .unwrap();

        assert!(plan.is_none());
    }

    #[test]
    fn test_acquire_held_lockup() {
        let holder = Uuid::new_v4();
        let member_id = Uuid::new_v4();
        let current = LockupSnapshot::held_by(holder);

        let err = plan_acquire(current, &eligible(member_id), LockupReason::Manual).unwrap_err();
        assert!(matches!(err, LockupError::HeldByOther { holder_id } if holder_id == holder));

        // DDS handoff and admin override take it over as a transfer
        for reason in [LockupReason::DdsHandoff, LockupReason::AdminOverride] {
            let plan = plan_acquire(current, &eligible(member_id), reason)
                .unwrap()
                .unwrap();
            assert_eq!(plan.action, LockupAction::Transfer);
            assert_eq!(plan.from_member_id, Some(holder));
            assert_eq!(plan.to_member_id, Some(member_id));
            assert_eq!(plan.reason, reason);
        }
    }

    #[test]
    fn test_acquire_requires_eligibility_even_when_free() {
        let mut candidate = eligible(Uuid::new_v4());
        candidate.is_qualified = false;

        let err = plan_acquire(LockupSnapshot::open_unassigned(), &candidate, LockupReason::Manual)
            .unwrap_err();
        assert!(matches!(err, LockupError::NotEligible { .. }));
    }

    #[test]
    fn test_transfer_by_holder() {
        let holder = Uuid::new_v4();
        let next = Uuid::new_v4();

        let plan = plan_transfer(
            LockupSnapshot::held_by(holder),
            Some(holder),
            &eligible(next),
            LockupReason::Manual,
        )
        .unwrap();

        assert_eq!(plan.action, LockupAction::Transfer);
        assert_eq!(plan.from_member_id, Some(holder));
        assert_eq!(plan.next, LockupSnapshot::held_by(next));
    }

    #[test]
    fn test_transfer_rejections() {
        let holder = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let next = Uuid::new_v4();
        let current = LockupSnapshot::held_by(holder);

        assert!(matches!(
            plan_transfer(current, Some(stranger), &eligible(next), LockupReason::Manual),
            Err(LockupError::NotHolder(id)) if id == stranger
        ));
        assert!(matches!(
            plan_transfer(current, None, &eligible(next), LockupReason::Manual),
            Err(LockupError::MissingActor)
        ));
        assert!(matches!(
            plan_transfer(current, Some(holder), &eligible(holder), LockupReason::Manual),
            Err(LockupError::SameMember)
        ));
        assert!(matches!(
            plan_transfer(
                LockupSnapshot::open_unassigned(),
                Some(holder),
                &eligible(next),
                LockupReason::Manual
            ),
            Err(LockupError::NoHolder)
        ));

        let mut absent = eligible(next);
        absent.is_present = false;
        assert!(matches!(
            plan_transfer(current, Some(holder), &absent, LockupReason::Manual),
            Err(LockupError::NotEligible { reason: Ineligibility::NotCheckedIn, .. })
        ));
    }

    #[test]
    fn test_admin_override_transfer_without_actor() {
        let holder = Uuid::new_v4();
        let next = Uuid::new_v4();

        let plan = plan_transfer(
            LockupSnapshot::held_by(holder),
            None,
            &eligible(next),
            LockupReason::AdminOverride,
        )
        .unwrap();

        assert_eq!(plan.from_member_id, Some(holder));
        assert_eq!(plan.reason, LockupReason::AdminOverride);
    }

    #[test]
    fn test_release() {
        let holder = Uuid::new_v4();

        assert!(
            plan_release(LockupSnapshot::open_unassigned(), None, LockupReason::DdsRelease)
                .unwrap()
                .is_none()
        );

        let plan = plan_release(
            LockupSnapshot::held_by(holder),
            Some(holder),
            LockupReason::DdsRelease,
        )
        .unwrap()
        .unwrap();
        assert_eq!(plan.action, LockupAction::Release);
        assert_eq!(plan.next, LockupSnapshot::open_unassigned());

        assert!(matches!(
            plan_release(
                LockupSnapshot::held_by(holder),
                Some(Uuid::new_v4()),
                LockupReason::DdsRelease
            ),
            Err(LockupError::NotHolder(_))
        ));
    }

    #[test]
    fn test_execute_secures_building() {
        let holder = Uuid::new_v4();

        let plan = plan_execute(LockupSnapshot::held_by(holder), Some(holder), false).unwrap();

        assert_eq!(plan.action, LockupAction::Execute);
        assert_eq!(plan.reason, LockupReason::LockupExecuted);
        assert_eq!(plan.from_member_id, Some(holder));
        assert_eq!(plan.next, LockupSnapshot::secured());
        assert!(plan.closes_building);
    }

    #[test]
    fn test_execute_rejections_and_override() {
        let holder = Uuid::new_v4();

        assert!(matches!(
            plan_execute(LockupSnapshot::secured(), Some(holder), false),
            Err(LockupError::AlreadySecured)
        ));
        assert!(matches!(
            plan_execute(LockupSnapshot::open_unassigned(), Some(holder), false),
            Err(LockupError::NoHolder)
        ));
        assert!(matches!(
            plan_execute(LockupSnapshot::held_by(holder), Some(Uuid::new_v4()), false),
            Err(LockupError::NotHolder(_))
        ));

        // An administrator can secure an unattended building
        let plan = plan_execute(LockupSnapshot::open_unassigned(), None, true).unwrap();
        assert_eq!(plan.reason, LockupReason::AdminOverride);
        assert_eq!(plan.from_member_id, None);
        assert!(plan.closes_building);
    }

    #[test]
    fn test_checkout_guard() {
        let holder = Uuid::new_v4();
        let other = Uuid::new_v4();
        let current = LockupSnapshot::held_by(holder);

        assert!(matches!(
            guard_checkout(current, holder),
            Err(LockupError::HoldsLockup(id)) if id == holder
        ));
        assert!(guard_checkout(current, other).is_ok());
        assert!(guard_checkout(LockupSnapshot::secured(), holder).is_ok());
    }

    #[test]
    fn test_error_mapping() {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let status = |e: LockupError| AppError::from(e).into_response().status();

        assert_eq!(status(LockupError::HoldsLockup(Uuid::new_v4())), StatusCode::CONFLICT);
        assert_eq!(status(LockupError::MemberNotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status(LockupError::NotHolder(Uuid::new_v4())), StatusCode::FORBIDDEN);
        assert_eq!(status(LockupError::SameMember), StatusCode::BAD_REQUEST);
    }
}
