use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dds_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DdsStatus {
    Pending,
    Active,
    Transferred,
    Released,
    Completed,
}

impl DdsStatus {
    /// Terminal assignments no longer block scheduling for their date
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DdsStatus::Transferred | DdsStatus::Released | DdsStatus::Completed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DdsAssignment {
    pub id: Uuid,
    pub member_id: Uuid,
    pub duty_date: NaiveDate,
    pub status: DdsStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub transferred_to_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DdsAssignment {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
        duty_date: NaiveDate,
        status: DdsStatus,
        notes: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO dds_assignments (member_id, duty_date, status, accepted_at, notes)
            VALUES ($1, $2, $3, CASE WHEN $3 = 'active'::dds_status THEN NOW() END, $4)
            RETURNING *
            "#,
        )
        .bind(member_id)
        .bind(duty_date)
        .bind(status)
        .bind(notes)
        .fetch_one(executor)
        .await
    }

    /// Non-terminal (pending or active) assignments for a date, locked for update
    pub async fn list_open_for_date<'e>(
        executor: impl PgExecutor<'e>,
        duty_date: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM dds_assignments
            WHERE duty_date = $1 AND status IN ('pending', 'active')
            ORDER BY created_at, seq
            FOR UPDATE
            "#,
        )
        .bind(duty_date)
        .fetch_all(executor)
        .await
    }

    pub async fn activate<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE dds_assignments
            SET status = 'active', accepted_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
    }

    /// Moves an assignment to a terminal status
    pub async fn finish<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: DdsStatus,
        transferred_to_id: Option<Uuid>,
        notes: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE dds_assignments
            SET status = $2,
                ended_at = NOW(),
                transferred_to_id = $3,
                notes = COALESCE($4, notes)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(transferred_to_id)
        .bind(notes)
        .fetch_one(executor)
        .await
    }

    pub async fn list_between<'e>(
        executor: impl PgExecutor<'e>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM dds_assignments
            WHERE duty_date BETWEEN $1 AND $2
            ORDER BY duty_date DESC, created_at DESC, seq DESC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await
    }

    /// Closes out assignments from dates before `today`
    pub async fn roll_over<'e>(
        executor: impl PgExecutor<'e>,
        today: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE dds_assignments
            SET status = CASE WHEN status = 'active' THEN 'completed'::dds_status
                              ELSE 'released'::dds_status END,
                ended_at = NOW()
            WHERE duty_date < $1 AND status IN ('pending', 'active')
            RETURNING *
            "#,
        )
        .bind(today)
        .fetch_all(executor)
        .await
    }
}
