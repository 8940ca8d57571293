use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{auth::get_authenticated_admin, session::AppState};
use crate::api::page_bounds;
use crate::error::Result;
use crate::models::{lockup::LockupStatusView, AdminRole, LockupReason, LockupTransfer};
use crate::services::lockup::{self, ExecuteOutcome, TransferCommand};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub member_id: Uuid,
    #[serde(default, rename = "override")]
    pub override_holder: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from_member_id: Option<Uuid>,
    pub to_member_id: Uuid,
    #[serde(default, rename = "override")]
    pub override_holder: bool,
    pub notes: Option<String>,
}

/// Body for release and execute; `member_id` is the holder acting
#[derive(Debug, Deserialize)]
pub struct HolderActionRequest {
    pub member_id: Option<Uuid>,
    #[serde(default, rename = "override")]
    pub override_holder: bool,
    pub notes: Option<String>,
}

/// Overrides are restricted to full administrators
async fn reason_for(session: &Session, override_holder: bool) -> Result<LockupReason> {
    if !override_holder {
        return Ok(LockupReason::Manual);
    }

    let admin = get_authenticated_admin(session).await?;
    admin.require_role(AdminRole::Admin)?;
    tracing::info!(admin_id = %admin.admin_id, "Lockup override requested");

    Ok(LockupReason::AdminOverride)
}

async fn status(State(state): State<AppState>) -> Result<Json<LockupStatusView>> {
    Ok(Json(lockup::status(&state.pool).await?))
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<LockupTransfer>>> {
    let (limit, offset) = page_bounds(params.limit, params.offset);
    Ok(Json(lockup::history(&state.pool, limit, offset).await?))
}

async fn acquire(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<AcquireRequest>,
) -> Result<Json<LockupStatusView>> {
    let reason = reason_for(&session, req.override_holder).await?;

    let view = lockup::acquire(
        &state.pool,
        &state.feed,
        req.member_id,
        reason,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(view))
}

async fn transfer(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<TransferRequest>,
) -> Result<Json<LockupStatusView>> {
    let reason = reason_for(&session, req.override_holder).await?;

    let view = lockup::transfer(
        &state.pool,
        &state.feed,
        TransferCommand {
            from_member_id: req.from_member_id,
            to_member_id: req.to_member_id,
            reason,
            notes: req.notes.as_deref(),
        },
    )
    .await?;

    Ok(Json(view))
}

async fn release(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<HolderActionRequest>,
) -> Result<Json<LockupStatusView>> {
    let reason = reason_for(&session, req.override_holder).await?;

    let view = lockup::release(
        &state.pool,
        &state.feed,
        req.member_id,
        reason,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(view))
}

async fn execute(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<HolderActionRequest>,
) -> Result<Json<ExecuteOutcome>> {
    let override_holder =
        reason_for(&session, req.override_holder).await? == LockupReason::AdminOverride;

    let outcome = lockup::execute(
        &state.pool,
        &state.feed,
        req.member_id,
        override_holder,
        req.notes.as_deref(),
    )
    .await?;

    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/lockup", get(status))
        .route("/api/lockup/history", get(history))
        .route("/api/lockup/acquire", post(acquire))
        .route("/api/lockup/transfer", post(transfer))
        .route("/api/lockup/release", post(release))
        .route("/api/lockup/execute", post(execute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_field_name() {
        let req: HolderActionRequest =
            serde_json::from_value(serde_json::json!({ "override": true })).unwrap();
        assert!(req.override_holder);
        assert_eq!(req.member_id, None);

        let req: AcquireRequest = serde_json::from_value(serde_json::json!({
            "member_id": Uuid::nil(),
        }))
        .unwrap();
        assert!(!req.override_holder);
    }
}
