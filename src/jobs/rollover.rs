use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::config::Config;
use crate::models::{
    BuildingStatus, Checkin, CheckoutMethod, DdsAssignment, LockupReason, LockupSnapshot,
    LockupStatus, Visitor,
};
use crate::services::live::{LiveEvent, LiveFeed};
use crate::services::lockup::{self, LockupPlan};

const ROLLOVER_NOTE: &str = "daily rollover";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RolloverStats {
    pub dds_closed: usize,
    pub checkins_closed: u64,
    pub visitors_signed_out: u64,
    pub lockup_changed: bool,
}

impl RolloverStats {
    fn changed_anything(&self) -> bool {
        self.dds_closed > 0
            || self.checkins_closed > 0
            || self.visitors_signed_out > 0
            || self.lockup_changed
    }
}

/// Decides what happens to lockup once stale attendance has been closed.
///
/// An empty building is secured. A holder who was checked out by the
/// rollover loses lockup so the building is left open and unassigned.
pub fn plan_rollover_lockup(
    current: LockupSnapshot,
    holder_present: bool,
    anyone_present: bool,
) -> Option<LockupPlan> {
    if current.building_status == BuildingStatus::Secured {
        return None;
    }

    if !anyone_present {
        return lockup::plan_execute(current, None, true).ok();
    }

    if current.holder_id.is_some() && !holder_present {
        return lockup::plan_release(current, None, LockupReason::AdminOverride)
            .ok()
            .flatten();
    }

    None
}

/// Closes out everything left over from previous duty days.
#[tracing::instrument(skip(pool, feed, config))]
pub async fn run(
    pool: &PgPool,
    feed: &LiveFeed,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<RolloverStats, sqlx::Error> {
    let today = config.duty_date(now);
    let (start_of_today, _) = config.day_bounds(today);

    let mut tx = pool.begin().await?;
    let current = LockupStatus::lock(&mut *tx).await?.snapshot();

    let mut stats = RolloverStats {
        dds_closed: DdsAssignment::roll_over(&mut *tx, today).await?.len(),
        checkins_closed: Checkin::close_stale(&mut *tx, start_of_today, CheckoutMethod::Rollover)
            .await?,
        visitors_signed_out: Visitor::sign_out_stale(&mut *tx, start_of_today).await?,
        lockup_changed: false,
    };

    let holder_present = match current.holder_id {
        Some(holder_id) => Checkin::find_open_for_member(&mut *tx, holder_id)
            .await?
            .is_some(),
        None => false,
    };
    let anyone_present = Checkin::count_present(&mut *tx).await?
        + Visitor::count_current(&mut *tx).await?
        > 0;

    let applied = match plan_rollover_lockup(current, holder_present, anyone_present) {
        Some(plan) => Some(lockup::apply_plan(&mut tx, &plan, Some(ROLLOVER_NOTE)).await?),
        None => None,
    };
    stats.lockup_changed = applied.is_some();

    tx.commit().await?;

    tracing::info!(
        duty_date = %today,
        dds_closed = stats.dds_closed,
        checkins_closed = stats.checkins_closed,
        visitors_signed_out = stats.visitors_signed_out,
        lockup_changed = stats.lockup_changed,
        "Daily rollover completed"
    );

    if let Some(applied) = applied {
        applied.publish(feed);
    }
    if stats.changed_anything() {
        feed.publish(LiveEvent::Resync);
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LockupAction;
    use uuid::Uuid;

    #[test]
    fn test_secured_building_untouched() {
        assert_eq!(plan_rollover_lockup(LockupSnapshot::secured(), false, false), None);
    }

    #[test]
    fn test_empty_building_is_secured() {
        let holder = Uuid::new_v4();

        let plan = plan_rollover_lockup(LockupSnapshot::held_by(holder), false, false).unwrap();
        assert_eq!(plan.action, LockupAction::Execute);
        assert_eq!(plan.reason, LockupReason::AdminOverride);
        assert_eq!(plan.next, LockupSnapshot::secured());

        let plan = plan_rollover_lockup(LockupSnapshot::open_unassigned(), false, false).unwrap();
        assert_eq!(plan.next, LockupSnapshot::secured());
    }

    #[test]
    fn test_absent_holder_loses_lockup() {
        let holder = Uuid::new_v4();

        let plan = plan_rollover_lockup(LockupSnapshot::held_by(holder), false, true).unwrap();
        assert_eq!(plan.action, LockupAction::Release);
        assert_eq!(plan.from_member_id, Some(holder));
        assert_eq!(plan.next, LockupSnapshot::open_unassigned());
    }

    #[test]
    fn test_present_holder_keeps_lockup() {
        let holder = Uuid::new_v4();

        assert_eq!(plan_rollover_lockup(LockupSnapshot::held_by(holder), true, true), None);
        assert_eq!(plan_rollover_lockup(LockupSnapshot::open_unassigned(), false, true), None);
    }
}
