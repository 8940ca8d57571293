use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::required;
use crate::error::{AppError, Result};
use crate::models::event::{CreateEventData, Event, UpdateEventData};

// Request/Response types
#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub upcoming: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

fn validate_window(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<()> {
    if ends_at <= starts_at {
        return Err(AppError::Validation(
            "Event must end after it starts".to_string(),
        ));
    }
    Ok(())
}

// Handlers

async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsQuery>,
) -> Result<Json<Vec<Event>>> {
    let events = if params.upcoming {
        Event::list_upcoming(&state.pool).await?
    } else {
        Event::list(&state.pool, params.active_only).await?
    };

    Ok(Json(events))
}

async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>)> {
    let name = required("name", &req.name)?;
    validate_window(req.starts_at, req.ends_at)?;

    let event = Event::create(
        &state.pool,
        CreateEventData {
            name,
            description: req.description,
            location: req.location,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
        },
    )
    .await?;

    tracing::info!(event_id = %event.id, name = %event.name, "Event created");

    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Event>> {
    let event = Event::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {}", id)))?;

    Ok(Json(event))
}

async fn update_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateEventRequest>,
) -> Result<Json<Event>> {
    let existing = Event::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {}", id)))?;

    let name = req.name.map(|name| required("name", &name)).transpose()?;
    validate_window(
        req.starts_at.unwrap_or(existing.starts_at),
        req.ends_at.unwrap_or(existing.ends_at),
    )?;

    let event = Event::update(
        &state.pool,
        id,
        UpdateEventData {
            name,
            description: req.description,
            location: req.location,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
        },
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Event {}", id)))?;

    tracing::info!(event_id = %event.id, "Event updated");

    Ok(Json(event))
}

/// Deactivate event
async fn deactivate_event(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    if !Event::deactivate(&state.pool, id).await? {
        return Err(AppError::NotFound(format!("Event {}", id)));
    }

    tracing::info!(event_id = %id, "Event deactivated");

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/:id", get(get_event).patch(update_event))
        .route("/api/events/:id/deactivate", post(deactivate_event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_event_window() {
        let start = Utc::now();

        assert!(validate_window(start, start + Duration::hours(2)).is_ok());
        assert!(matches!(
            validate_window(start, start),
            Err(AppError::Validation(_))
        ));
        assert!(validate_window(start, start - Duration::minutes(1)).is_err());
    }
}
