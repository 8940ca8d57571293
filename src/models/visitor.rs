use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visitor {
    pub id: Uuid,
    pub full_name: String,
    pub organization: Option<String>,
    pub visit_reason: Option<String>,
    pub host_member_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub badge_id: Option<Uuid>, // temporary visitor badge
    pub kiosk_id: Option<String>,
    pub signed_in_at: DateTime<Utc>,
    pub signed_out_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVisitorData {
    pub full_name: String,
    pub organization: Option<String>,
    pub visit_reason: Option<String>,
    pub host_member_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub badge_id: Option<Uuid>,
    pub kiosk_id: Option<String>,
}

impl Visitor {
    pub fn is_signed_in(&self) -> bool {
        self.signed_out_at.is_none()
    }

    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: CreateVisitorData,
    ) -> Result<Self, sqlx::Error> {
        let visitor = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO visitors (full_name, organization, visit_reason, host_member_id, event_id, badge_id, kiosk_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(data.full_name)
        .bind(data.organization)
        .bind(data.visit_reason)
        .bind(data.host_member_id)
        .bind(data.event_id)
        .bind(data.badge_id)
        .bind(data.kiosk_id)
        .fetch_one(executor)
        .await?;

        Ok(visitor)
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let visitor = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM visitors WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(visitor)
    }

    /// Returns true when the badge is already handed out to a signed-in visitor
    pub async fn badge_in_use<'e>(
        executor: impl PgExecutor<'e>,
        badge_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM visitors
                WHERE badge_id = $1 AND signed_out_at IS NULL
            )
            "#,
        )
        .bind(badge_id)
        .fetch_one(executor)
        .await
    }

    pub async fn sign_out<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let visitor = sqlx::query_as::<_, Self>(
            r#"
            UPDATE visitors
            SET signed_out_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(visitor)
    }

    /// Signs out every visitor still in the building, returning their ids
    pub async fn sign_out_all<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE visitors
            SET signed_out_at = NOW()
            WHERE signed_out_at IS NULL
            RETURNING id
            "#,
        )
        .fetch_all(executor)
        .await
    }

    pub async fn sign_out_stale<'e>(
        executor: impl PgExecutor<'e>,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE visitors
            SET signed_out_at = NOW()
            WHERE signed_out_at IS NULL AND signed_in_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_current<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Self>, sqlx::Error> {
        let visitors = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM visitors
            WHERE signed_out_at IS NULL
            ORDER BY signed_in_at
            "#,
        )
        .fetch_all(executor)
        .await?;

        Ok(visitors)
    }

    /// Lists visits that started within `[from, to)`
    pub async fn list_between<'e>(
        executor: impl PgExecutor<'e>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let visitors = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM visitors
            WHERE signed_in_at >= $1 AND signed_in_at < $2
            ORDER BY signed_in_at DESC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await?;

        Ok(visitors)
    }

    pub async fn count_current<'e>(executor: impl PgExecutor<'e>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM visitors WHERE signed_out_at IS NULL
            "#,
        )
        .fetch_one(executor)
        .await
    }
}
