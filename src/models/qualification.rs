use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

/// Admin-managed qualification catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QualificationType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub grants_lockup: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateQualificationTypeData {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub grants_lockup: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateQualificationTypeData {
    pub name: Option<String>,
    pub description: Option<String>,
    pub grants_lockup: Option<bool>,
}

/// A qualification held by a member, joined with its type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MemberQualification {
    pub id: Uuid,
    pub member_id: Uuid,
    pub qualification_type_id: Uuid,
    pub code: String,
    pub name: String,
    pub grants_lockup: bool,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemberQualification {
    pub fn is_current_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > at)
    }
}

impl QualificationType {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: CreateQualificationTypeData,
    ) -> Result<Self, sqlx::Error> {
        let qualification_type = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO qualification_types (code, name, description, grants_lockup)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.code)
        .bind(data.name)
        .bind(data.description)
        .bind(data.grants_lockup)
        .fetch_one(executor)
        .await?;

        Ok(qualification_type)
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM qualification_types WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM qualification_types ORDER BY name
            "#,
        )
        .fetch_all(executor)
        .await
    }

    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        data: UpdateQualificationTypeData,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE qualification_types
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                grants_lockup = COALESCE($4, grants_lockup),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.grants_lockup)
        .fetch_optional(executor)
        .await
    }

    pub async fn count_grants<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM member_qualifications WHERE qualification_type_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
    }

    pub async fn delete<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM qualification_types WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl MemberQualification {
    /// Grants (or re-grants with a new expiry) a qualification to a member
    pub async fn grant<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
        qualification_type_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            WITH granted AS (
                INSERT INTO member_qualifications (member_id, qualification_type_id, expires_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (member_id, qualification_type_id)
                DO UPDATE SET granted_at = NOW(), expires_at = EXCLUDED.expires_at
                RETURNING *
            )
            SELECT g.id, g.member_id, g.qualification_type_id, qt.code, qt.name,
                   qt.grants_lockup, g.granted_at, g.expires_at
            FROM granted g
            JOIN qualification_types qt ON qt.id = g.qualification_type_id
            "#,
        )
        .bind(member_id)
        .bind(qualification_type_id)
        .bind(expires_at)
        .fetch_one(executor)
        .await
    }

    pub async fn revoke<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
        qualification_type_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM member_qualifications
            WHERE member_id = $1 AND qualification_type_id = $2
            "#,
        )
        .bind(member_id)
        .bind(qualification_type_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_member<'e>(
        executor: impl PgExecutor<'e>,
        member_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT mq.id, mq.member_id, mq.qualification_type_id, qt.code, qt.name,
                   qt.grants_lockup, mq.granted_at, mq.expires_at
            FROM member_qualifications mq
            JOIN qualification_types qt ON qt.id = mq.qualification_type_id
            WHERE mq.member_id = $1
            ORDER BY qt.name
            "#,
        )
        .bind(member_id)
        .fetch_all(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn qualification(expires_at: Option<DateTime<Utc>>) -> MemberQualification {
        MemberQualification {
            id: Uuid::new_v4(),
            member_id: Uuid::new_v4(),
            qualification_type_id: Uuid::new_v4(),
            code: "BLDG_SEC".to_string(),
            name: "Building Security".to_string(),
            grants_lockup: true,
            granted_at: Utc::now() - Duration::days(30),
            expires_at,
        }
    }

    #[test]
    fn test_qualification_expiry() {
        let now = Utc::now();

        assert!(qualification(None).is_current_at(now));
        assert!(qualification(Some(now + Duration::days(1))).is_current_at(now));
        assert!(!qualification(Some(now - Duration::seconds(1))).is_current_at(now));
        assert!(!qualification(Some(now)).is_current_at(now));
    }
}
