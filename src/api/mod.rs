// API module - HTTP endpoints

pub mod attendance;
pub mod auth;
pub mod badges;
pub mod dds;
pub mod events;
pub mod health;
pub mod import;
pub mod kiosk;
pub mod lockup;
pub mod members;
pub mod middleware;
pub mod qualifications;
pub mod visitors;
pub mod ws;

use axum::{middleware::from_fn, middleware::from_fn_with_state, routing::get, Router};
use tower_sessions::{SessionManagerLayer, SessionStore};

use crate::db::unique_violation;
use crate::error::{AppError, Result};
use middleware::{auth::require_auth, kiosk::require_kiosk_key, session::AppState};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// Builds the full application router around the given session layer
pub fn router<S>(state: AppState, sessions: SessionManagerLayer<S>) -> Router
where
    S: SessionStore + Clone,
{
    let admin = Router::new()
        .merge(members::router())
        .merge(badges::router())
        .merge(events::router())
        .merge(qualifications::router())
        .merge(visitors::router())
        .merge(attendance::router())
        .merge(lockup::router())
        .merge(dds::router())
        .merge(import::router())
        .merge(ws::router())
        .route_layer(from_fn(require_auth));

    let kiosk = kiosk::router().route_layer(from_fn_with_state(state.clone(), require_kiosk_key));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(auth::router())
        .merge(admin)
        .merge(kiosk)
        .layer(sessions)
        .with_state(state)
}

/// Trims a required text field, rejecting blank input
pub(crate) fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Turns a unique violation into a conflict carrying `message`
pub(crate) fn conflict_on_unique(error: sqlx::Error, message: &str) -> AppError {
    match unique_violation(&error) {
        Some(constraint) => {
            tracing::debug!(constraint, "Unique constraint violated");
            AppError::Conflict(message.to_string())
        }
        None => AppError::Database(error),
    }
}

pub(crate) fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}
