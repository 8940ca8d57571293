use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::page_bounds;
use crate::error::{AppError, Result};
use crate::models::{checkin::CheckinFilter, Checkin};
use crate::services::attendance::{self, Presence};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub member_id: Option<Uuid>,
    /// Inclusive facility-local dates
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn presence(State(state): State<AppState>) -> Result<Json<Presence>> {
    let today = state.config.today();
    Ok(Json(attendance::presence(&state.pool, today).await?))
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<Checkin>>> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(AppError::Validation(
                "'from' must not be after 'to'".to_string(),
            ));
        }
    }

    let (limit, offset) = page_bounds(params.limit, params.offset);
    let filter = CheckinFilter {
        member_id: params.member_id,
        from: params.from.map(|date| state.config.day_bounds(date).0),
        to: params.to.map(|date| state.config.day_bounds(date).1),
        limit,
        offset,
    };

    Ok(Json(attendance::history(&state.pool, &filter).await?))
}

async fn checkout(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<Json<Checkin>> {
    Ok(Json(
        attendance::admin_checkout(&state.pool, &state.feed, member_id).await?,
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/attendance/presence", get(presence))
        .route("/api/attendance/history", get(history))
        .route("/api/attendance/:member_id/checkout", post(checkout))
}
