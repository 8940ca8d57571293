use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    Regular,
    Reserve,
    Civilian,
    Cadet,
}

impl FromStr for MemberType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "regular" => Ok(MemberType::Regular),
            "reserve" => Ok(MemberType::Reserve),
            "civilian" => Ok(MemberType::Civilian),
            "cadet" => Ok(MemberType::Cadet),
            other => Err(format!("unknown member type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub id: Uuid,
    pub service_number: String,
    pub rank: String,
    pub first_name: String,
    pub last_name: String,
    pub division: Option<String>,
    pub member_type: MemberType,
    pub email: Option<String>,
    pub status: MemberStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Compact member reference embedded in kiosk and dashboard payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: Uuid,
    pub service_number: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct CreateMemberData {
    pub service_number: String,
    pub rank: String,
    pub first_name: String,
    pub last_name: String,
    pub division: Option<String>,
    pub member_type: MemberType,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMemberData {
    pub rank: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub division: Option<String>,
    pub member_type: Option<MemberType>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    pub status: Option<MemberStatus>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Member {
    pub fn display_name(&self) -> String {
        format!("{} {} {}", self.rank, self.first_name, self.last_name)
    }

    pub fn summary(&self) -> MemberSummary {
        MemberSummary {
            id: self.id,
            service_number: self.service_number.clone(),
            display_name: self.display_name(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Creates a new member record
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: CreateMemberData,
    ) -> Result<Self, sqlx::Error> {
        let member = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO members (service_number, rank, first_name, last_name, division, member_type, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&data.service_number)
        .bind(&data.rank)
        .bind(&data.first_name)
        .bind(&data.last_name)
        .bind(&data.division)
        .bind(data.member_type)
        .bind(&data.email)
        .fetch_one(executor)
        .await?;

        Ok(member)
    }

    /// Finds a member by their internal ID
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let member = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM members WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(member)
    }

    pub async fn find_by_service_number<'e>(
        executor: impl PgExecutor<'e>,
        service_number: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let member = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM members WHERE service_number = $1
            "#,
        )
        .bind(service_number)
        .fetch_optional(executor)
        .await?;

        Ok(member)
    }

    /// Loads every member whose service number appears in `service_numbers`
    pub async fn find_by_service_numbers<'e>(
        executor: impl PgExecutor<'e>,
        service_numbers: &[String],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let members = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM members WHERE service_number = ANY($1)
            "#,
        )
        .bind(service_numbers)
        .fetch_all(executor)
        .await?;

        Ok(members)
    }

    /// Lists members, optionally filtered by status and a name/service number search
    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        filter: &MemberFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let search = filter
            .search
            .as_ref()
            .map(|s| format!("%{}%", s.trim().to_lowercase()));

        let members = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM members
            WHERE ($1::member_status IS NULL OR status = $1)
              AND (
                $2::text IS NULL
                OR LOWER(first_name) LIKE $2
                OR LOWER(last_name) LIKE $2
                OR LOWER(service_number) LIKE $2
              )
            ORDER BY last_name, first_name
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.status)
        .bind(search)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(executor)
        .await?;

        Ok(members)
    }

    /// Updates the provided fields, leaving the others untouched
    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        data: UpdateMemberData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let member = sqlx::query_as::<_, Self>(
            r#"
            UPDATE members
            SET
                rank = COALESCE($2, rank),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                division = COALESCE($5, division),
                member_type = COALESCE($6, member_type),
                email = COALESCE($7, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.rank)
        .bind(data.first_name)
        .bind(data.last_name)
        .bind(data.division)
        .bind(data.member_type)
        .bind(data.email)
        .fetch_optional(executor)
        .await?;

        Ok(member)
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: MemberStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE members
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(executor)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_type_parsing() {
        assert_eq!("Reserve".parse::<MemberType>(), Ok(MemberType::Reserve));
        assert_eq!(" cadet ".parse::<MemberType>(), Ok(MemberType::Cadet));
        assert_eq!("".parse::<MemberType>(), Ok(MemberType::Regular));
        assert!("admiral".parse::<MemberType>().is_err());
    }
}
