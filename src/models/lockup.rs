use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "building_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BuildingStatus {
    Secured,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lockup_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LockupAction {
    Acquire,
    Transfer,
    Release,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lockup_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LockupReason {
    Manual,
    DdsHandoff,
    DdsRelease,
    AdminOverride,
    LockupExecuted,
}

/// The two columns of the singleton status row that drive every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockupSnapshot {
    pub building_status: BuildingStatus,
    pub holder_id: Option<Uuid>,
}

impl LockupSnapshot {
    pub fn secured() -> Self {
        Self {
            building_status: BuildingStatus::Secured,
            holder_id: None,
        }
    }

    pub fn held_by(holder_id: Uuid) -> Self {
        Self {
            building_status: BuildingStatus::Open,
            holder_id: Some(holder_id),
        }
    }

    pub fn open_unassigned() -> Self {
        Self {
            building_status: BuildingStatus::Open,
            holder_id: None,
        }
    }

    pub fn is_held_by(&self, member_id: Uuid) -> bool {
        self.holder_id == Some(member_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LockupStatus {
    pub id: i32,
    pub building_status: BuildingStatus,
    pub current_holder_id: Option<Uuid>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub secured_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Conditions on an open building that need someone's attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockupWarning {
    /// Building is open and nobody holds lockup
    Unassigned,
    /// The holder has checked out or was checked out by an admin
    HolderAbsent,
}

/// Status row joined with the holder's name and presence.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LockupStatusView {
    pub building_status: BuildingStatus,
    pub current_holder_id: Option<Uuid>,
    pub holder_name: Option<String>,
    pub holder_present: bool,
    pub acquired_at: Option<DateTime<Utc>>,
    pub secured_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub warning: Option<LockupWarning>,
}

impl LockupStatusView {
    pub fn compute_warning(&self) -> Option<LockupWarning> {
        if self.building_status == BuildingStatus::Secured {
            return None;
        }

        match self.current_holder_id {
            None => Some(LockupWarning::Unassigned),
            Some(_) if !self.holder_present => Some(LockupWarning::HolderAbsent),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LockupTransfer {
    pub id: Uuid,
    pub from_member_id: Option<Uuid>,
    pub to_member_id: Option<Uuid>,
    pub action: LockupAction,
    pub reason: LockupReason,
    pub notes: Option<String>,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLockupTransfer {
    pub from_member_id: Option<Uuid>,
    pub to_member_id: Option<Uuid>,
    pub action: LockupAction,
    pub reason: LockupReason,
    pub notes: Option<String>,
}

/// What the lockup rules need to know about a prospective holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct LockupCandidate {
    pub member_id: Uuid,
    pub is_active: bool,
    pub is_present: bool,
    pub is_qualified: bool,
}

impl LockupStatus {
    pub fn snapshot(&self) -> LockupSnapshot {
        LockupSnapshot {
            building_status: self.building_status,
            holder_id: self.current_holder_id,
        }
    }

    /// Reads the singleton row and locks it until the transaction ends.
    /// Every lockup, DDS and attendance mutation goes through this lock.
    pub async fn lock<'e>(executor: impl PgExecutor<'e>) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM lockup_status WHERE id = 1 FOR UPDATE
            "#,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn fetch_view<'e>(executor: impl PgExecutor<'e>) -> Result<LockupStatusView, sqlx::Error> {
        let mut view = sqlx::query_as::<_, LockupStatusView>(
            r#"
            SELECT
                ls.building_status,
                ls.current_holder_id,
                CASE WHEN m.id IS NULL THEN NULL
                     ELSE m.rank || ' ' || m.first_name || ' ' || m.last_name END AS holder_name,
                EXISTS (
                    SELECT 1 FROM checkins c
                    WHERE c.member_id = ls.current_holder_id AND c.checked_out_at IS NULL
                ) AS holder_present,
                ls.acquired_at,
                ls.secured_at,
                ls.updated_at
            FROM lockup_status ls
            LEFT JOIN members m ON m.id = ls.current_holder_id
            WHERE ls.id = 1
            "#,
        )
        .fetch_one(executor)
        .await?;

        view.warning = view.compute_warning();
        Ok(view)
    }

    /// Writes a new snapshot. `acquired_at` restarts whenever the holder changes
    /// and `secured_at` whenever the building transitions to secured.
    pub async fn store<'e>(
        executor: impl PgExecutor<'e>,
        next: LockupSnapshot,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE lockup_status
            SET
                acquired_at = CASE
                    WHEN $2::uuid IS NULL THEN NULL
                    WHEN current_holder_id IS DISTINCT FROM $2 THEN NOW()
                    ELSE acquired_at
                END,
                secured_at = CASE
                    WHEN $1 = 'secured'::building_status AND building_status <> 'secured'::building_status
                        THEN NOW()
                    ELSE secured_at
                END,
                building_status = $1,
                current_holder_id = $2,
                updated_at = NOW()
            WHERE id = 1
            RETURNING *
            "#,
        )
        .bind(next.building_status)
        .bind(next.holder_id)
        .fetch_one(executor)
        .await
    }
}

impl LockupTransfer {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: NewLockupTransfer,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO lockup_transfers (from_member_id, to_member_id, action, reason, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(data.from_member_id)
        .bind(data.to_member_id)
        .bind(data.action)
        .bind(data.reason)
        .bind(data.notes)
        .fetch_one(executor)
        .await
    }

    pub async fn list_recent<'e>(
        executor: impl PgExecutor<'e>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM lockup_transfers
            ORDER BY performed_at DESC, seq DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
    }
}

impl LockupCandidate {
    /// Loads eligibility facts for `member_id`; `None` when the member does not exist
    pub async fn load<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT
                m.id AS member_id,
                (m.status = 'active') AS is_active,
                EXISTS (
                    SELECT 1 FROM checkins c
                    WHERE c.member_id = m.id AND c.checked_out_at IS NULL
                ) AS is_present,
                EXISTS (
                    SELECT 1
                    FROM member_qualifications mq
                    JOIN qualification_types qt ON qt.id = mq.qualification_type_id
                    WHERE mq.member_id = m.id
                      AND qt.grants_lockup
                      AND (mq.expires_at IS NULL OR mq.expires_at > $2)
                ) AS is_qualified
            FROM members m
            WHERE m.id = $1
            "#,
        )
        .bind(member_id)
        .bind(at)
        .fetch_optional(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(snapshot: LockupSnapshot, holder_present: bool) -> LockupStatusView {
        LockupStatusView {
            building_status: snapshot.building_status,
            current_holder_id: snapshot.holder_id,
            holder_name: snapshot.holder_id.map(|_| "PO1 Sam Roy".to_string()),
            holder_present,
            acquired_at: None,
            secured_at: None,
            updated_at: Utc::now(),
            warning: None,
        }
    }

    #[test]
    fn test_status_warnings() {
        let holder = Uuid::new_v4();

        assert_eq!(view(LockupSnapshot::secured(), false).compute_warning(), None);
        assert_eq!(view(LockupSnapshot::held_by(holder), true).compute_warning(), None);
        assert_eq!(
            view(LockupSnapshot::open_unassigned(), false).compute_warning(),
            Some(LockupWarning::Unassigned)
        );
        assert_eq!(
            view(LockupSnapshot::held_by(holder), false).compute_warning(),
            Some(LockupWarning::HolderAbsent)
        );
    }

    #[test]
    fn test_warning_serializes_snake_case() {
        let json = serde_json::to_value(view(LockupSnapshot::open_unassigned(), false)).unwrap();
        assert_eq!(json["warning"], serde_json::Value::Null);

        let mut unassigned = view(LockupSnapshot::open_unassigned(), false);
        unassigned.warning = unassigned.compute_warning();
        let json = serde_json::to_value(unassigned).unwrap();
        assert_eq!(json["warning"], "unassigned");
    }
}
