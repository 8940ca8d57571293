use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "badge_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BadgeStatus {
    Active,
    Inactive,
    Lost,
    Returned,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Badge {
    pub id: Uuid,
    pub serial_number: String,
    pub status: BadgeStatus,
    pub member_id: Option<Uuid>, // None for unassigned and visitor badges
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Badge {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        serial_number: &str,
    ) -> Result<Self, sqlx::Error> {
        let badge = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO badges (serial_number)
            VALUES ($1)
            RETURNING *
            "#,
        )
        .bind(serial_number)
        .fetch_one(executor)
        .await?;

        Ok(badge)
    }

    /// Finds a badge by the serial number printed on (and encoded in) the card
    pub async fn find_by_serial<'e>(
        executor: impl PgExecutor<'e>,
        serial_number: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let badge = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM badges WHERE serial_number = $1
            "#,
        )
        .bind(serial_number)
        .fetch_optional(executor)
        .await?;

        Ok(badge)
    }

    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        status: Option<BadgeStatus>,
        unassigned_only: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let badges = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM badges
            WHERE ($1::badge_status IS NULL OR status = $1)
              AND (NOT $2 OR member_id IS NULL)
            ORDER BY serial_number
            "#,
        )
        .bind(status)
        .bind(unassigned_only)
        .fetch_all(executor)
        .await?;

        Ok(badges)
    }

    /// Reads a badge and locks its row until the transaction ends
    pub async fn lock<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let badge = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM badges WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(badge)
    }

    /// Assigns an active badge that is free or already carried by `member_id`.
    /// Returns `None` when the badge is missing, inactive or held by someone else.
    pub async fn assign<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        member_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let badge = sqlx::query_as::<_, Self>(
            r#"
            UPDATE badges
            SET member_id = $2, assigned_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND status = 'active'
              AND (member_id IS NULL OR member_id = $2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(member_id)
        .fetch_optional(executor)
        .await?;

        Ok(badge)
    }

    pub async fn unassign<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let badge = sqlx::query_as::<_, Self>(
            r#"
            UPDATE badges
            SET member_id = NULL, assigned_at = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(badge)
    }

    /// Unassigns whatever active badge the member currently carries
    pub async fn unassign_member<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE badges
            SET member_id = NULL, assigned_at = NULL, updated_at = NOW()
            WHERE member_id = $1 AND status = 'active'
            "#,
        )
        .bind(member_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: BadgeStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        let badge = sqlx::query_as::<_, Self>(
            r#"
            UPDATE badges
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(executor)
        .await?;

        Ok(badge)
    }
}
