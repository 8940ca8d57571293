use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::models::Visitor;
use crate::services::visitors;

#[derive(Debug, Deserialize)]
pub struct ListVisitorsQuery {
    /// Facility-local day; omitted means visitors currently signed in
    pub date: Option<NaiveDate>,
}

async fn list_visitors(
    State(state): State<AppState>,
    Query(params): Query<ListVisitorsQuery>,
) -> Result<Json<Vec<Visitor>>> {
    let visitors = match params.date {
        Some(date) => {
            let (from, to) = state.config.day_bounds(date);
            visitors::list_between(&state.pool, from, to).await?
        }
        None => visitors::list_current(&state.pool).await?,
    };

    Ok(Json(visitors))
}

async fn sign_out_visitor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Visitor>> {
    Ok(Json(visitors::sign_out(&state.pool, &state.feed, id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/visitors", get(list_visitors))
        .route("/api/visitors/:id/sign-out", post(sign_out_visitor))
}
