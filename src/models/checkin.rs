use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "checkout_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMethod {
    Kiosk,
    Admin,
    Lockup,
    Rollover,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Checkin {
    pub id: Uuid,
    pub member_id: Uuid,
    pub badge_id: Option<Uuid>,
    pub kiosk_id: Option<String>,
    pub checked_in_at: DateTime<Utc>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub checkout_method: Option<CheckoutMethod>,
}

/// A member currently in the building, joined with their name for display.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PresentMember {
    pub member_id: Uuid,
    pub service_number: String,
    pub rank: String,
    pub first_name: String,
    pub last_name: String,
    pub division: Option<String>,
    pub kiosk_id: Option<String>,
    pub checked_in_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckinFilter {
    pub member_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Checkin {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
        badge_id: Option<Uuid>,
        kiosk_id: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let checkin = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO checkins (member_id, badge_id, kiosk_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(member_id)
        .bind(badge_id)
        .bind(kiosk_id)
        .fetch_one(executor)
        .await?;

        Ok(checkin)
    }

    /// Finds the member's open checkin, locking it for the rest of the transaction
    pub async fn find_open_for_member<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let checkin = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM checkins
            WHERE member_id = $1 AND checked_out_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(member_id)
        .fetch_optional(executor)
        .await?;

        Ok(checkin)
    }

    pub async fn close<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        method: CheckoutMethod,
    ) -> Result<Self, sqlx::Error> {
        let checkin = sqlx::query_as::<_, Self>(
            r#"
            UPDATE checkins
            SET checked_out_at = NOW(), checkout_method = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(method)
        .fetch_one(executor)
        .await?;

        Ok(checkin)
    }

    /// Closes every open checkin, returning the affected member ids
    pub async fn close_all_open<'e>(
        executor: impl PgExecutor<'e>,
        method: CheckoutMethod,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let member_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE checkins
            SET checked_out_at = NOW(), checkout_method = $1
            WHERE checked_out_at IS NULL
            RETURNING member_id
            "#,
        )
        .bind(method)
        .fetch_all(executor)
        .await?;

        Ok(member_ids)
    }

    /// Closes checkins left open since before `cutoff`
    pub async fn close_stale<'e>(
        executor: impl PgExecutor<'e>,
        cutoff: DateTime<Utc>,
        method: CheckoutMethod,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE checkins
            SET checked_out_at = NOW(), checkout_method = $2
            WHERE checked_out_at IS NULL AND checked_in_at < $1
            "#,
        )
        .bind(cutoff)
        .bind(method)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_present<'e>(
        executor: impl PgExecutor<'e>,
    ) -> Result<Vec<PresentMember>, sqlx::Error> {
        let present = sqlx::query_as::<_, PresentMember>(
            r#"
            SELECT
                m.id AS member_id, m.service_number, m.rank, m.first_name, m.last_name,
                m.division, c.kiosk_id, c.checked_in_at
            FROM checkins c
            JOIN members m ON m.id = c.member_id
            WHERE c.checked_out_at IS NULL
            ORDER BY c.checked_in_at
            "#,
        )
        .fetch_all(executor)
        .await?;

        Ok(present)
    }

    pub async fn count_present<'e>(executor: impl PgExecutor<'e>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM checkins WHERE checked_out_at IS NULL
            "#,
        )
        .fetch_one(executor)
        .await
    }

    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        filter: &CheckinFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let checkins = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM checkins
            WHERE ($1::uuid IS NULL OR member_id = $1)
              AND ($2::timestamptz IS NULL OR checked_in_at >= $2)
              AND ($3::timestamptz IS NULL OR checked_in_at < $3)
            ORDER BY checked_in_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.member_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(executor)
        .await?;

        Ok(checkins)
    }
}
