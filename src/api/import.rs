use axum::{extract::State, routing::post, Json, Router};
use tower_sessions::Session;

use crate::api::middleware::{auth::get_authenticated_admin, session::AppState};
use crate::error::Result;
use crate::models::AdminRole;
use crate::services::import::{self, ImportPreview, ImportResult};

/// Classifies an uploaded CSV without writing anything
async fn preview(State(state): State<AppState>, body: String) -> Result<Json<ImportPreview>> {
    Ok(Json(import::preview(&state.pool, &body).await?))
}

/// Applies an uploaded CSV; only administrators may change the roster in bulk
async fn commit(
    State(state): State<AppState>,
    session: Session,
    body: String,
) -> Result<Json<ImportResult>> {
    let admin = get_authenticated_admin(&session).await?;
    admin.require_role(AdminRole::Admin)?;

    let result = import::commit(&state.pool, &body).await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        created = result.created,
        updated = result.updated,
        "Import applied"
    );

    Ok(Json(result))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/import/members/preview", post(preview))
        .route("/api/import/members/commit", post(commit))
}
