use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventData {
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEventData {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Visitors can only be signed in against an active event that has not ended
    pub fn accepts_visitors_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active && at < self.ends_at
    }

    /// Create a new event
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: CreateEventData,
    ) -> Result<Self, sqlx::Error> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (name, description, location, starts_at, ends_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(data.name)
        .bind(data.description)
        .bind(data.location)
        .bind(data.starts_at)
        .bind(data.ends_at)
        .fetch_one(executor)
        .await?;

        Ok(event)
    }

    /// Find event by ID
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(event)
    }

    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        active_only: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = if active_only {
            r#"
            SELECT * FROM events
            WHERE is_active = TRUE
            ORDER BY starts_at DESC
            "#
        } else {
            r#"
            SELECT * FROM events
            ORDER BY starts_at DESC
            "#
        };

        let events = sqlx::query_as::<_, Event>(query)
            .fetch_all(executor)
            .await?;

        Ok(events)
    }

    /// List active events that have not finished yet
    pub async fn list_upcoming<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Self>, sqlx::Error> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE is_active = TRUE
              AND ends_at >= NOW()
            ORDER BY starts_at ASC
            "#,
        )
        .fetch_all(executor)
        .await?;

        Ok(events)
    }

    /// Update an event
    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        data: UpdateEventData,
    ) -> Result<Option<Self>, sqlx::Error> {
        // Build dynamic update query based on which fields are provided
        let mut query = String::from("UPDATE events SET ");
        let mut updates = Vec::new();
        let mut bind_count = 1;

        if data.name.is_some() {
            updates.push(format!("name = ${}", bind_count));
            bind_count += 1;
        }
        if data.description.is_some() {
            updates.push(format!("description = ${}", bind_count));
            bind_count += 1;
        }
        if data.location.is_some() {
            updates.push(format!("location = ${}", bind_count));
            bind_count += 1;
        }
        if data.starts_at.is_some() {
            updates.push(format!("starts_at = ${}", bind_count));
            bind_count += 1;
        }
        if data.ends_at.is_some() {
            updates.push(format!("ends_at = ${}", bind_count));
            bind_count += 1;
        }

        updates.push("updated_at = NOW()".to_string());

        query.push_str(&updates.join(", "));
        query.push_str(&format!(" WHERE id = ${} RETURNING *", bind_count));

        let mut query_builder = sqlx::query_as::<_, Event>(&query);

        if let Some(name) = data.name {
            query_builder = query_builder.bind(name);
        }
        if let Some(description) = data.description {
            query_builder = query_builder.bind(description);
        }
        if let Some(location) = data.location {
            query_builder = query_builder.bind(location);
        }
        if let Some(starts_at) = data.starts_at {
            query_builder = query_builder.bind(starts_at);
        }
        if let Some(ends_at) = data.ends_at {
            query_builder = query_builder.bind(ends_at);
        }

        query_builder = query_builder.bind(id);

        let event = query_builder.fetch_optional(executor).await?;

        Ok(event)
    }

    /// Deactivate an event (soft delete)
    pub async fn deactivate<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
