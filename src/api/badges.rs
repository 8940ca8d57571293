use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::{conflict_on_unique, required};
use crate::error::{AppError, Result};
use crate::models::{Badge, BadgeStatus, Member, Visitor};

#[derive(Debug, Deserialize)]
pub struct ListBadgesQuery {
    pub status: Option<BadgeStatus>,
    #[serde(default)]
    pub unassigned: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateBadgeRequest {
    pub serial_number: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignBadgeRequest {
    pub member_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct BadgeStatusRequest {
    pub status: BadgeStatus,
}

/// Only active badges that are free or already carried by `member_id` can be assigned
fn check_assignable(badge: &Badge, member_id: Uuid) -> Result<()> {
    if badge.status != BadgeStatus::Active {
        return Err(AppError::Validation(format!(
            "Badge {} is not active",
            badge.serial_number
        )));
    }

    match badge.member_id {
        Some(holder) if holder != member_id => Err(AppError::Conflict(format!(
            "Badge {} is assigned to another member",
            badge.serial_number
        ))),
        _ => Ok(()),
    }
}

async fn list_badges(
    State(state): State<AppState>,
    Query(params): Query<ListBadgesQuery>,
) -> Result<Json<Vec<Badge>>> {
    Ok(Json(
        Badge::list(&state.pool, params.status, params.unassigned).await?,
    ))
}

async fn create_badge(
    State(state): State<AppState>,
    Json(req): Json<CreateBadgeRequest>,
) -> Result<(StatusCode, Json<Badge>)> {
    let serial_number = required("serial_number", &req.serial_number)?;

    let badge = Badge::create(&state.pool, &serial_number)
        .await
        .map_err(|e| conflict_on_unique(e, "A badge with this serial number already exists"))?;

    tracing::info!(badge_id = %badge.id, serial_number = %badge.serial_number, "Badge created");

    Ok((StatusCode::CREATED, Json(badge)))
}

/// Assigns a badge, replacing whatever active badge the member carried before
async fn assign_badge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignBadgeRequest>,
) -> Result<Json<Badge>> {
    let mut tx = state.pool.begin().await?;

    // Concurrent assignments of the same badge queue up behind this lock
    let badge = Badge::lock(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Badge {}", id)))?;
    check_assignable(&badge, req.member_id)?;

    let member = Member::find_by_id(&mut *tx, req.member_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Member {}", req.member_id)))?;
    if !member.is_active() {
        return Err(AppError::Validation(format!(
            "Member {} is not active",
            member.service_number
        )));
    }

    if Visitor::badge_in_use(&mut *tx, id).await? {
        return Err(AppError::Conflict(format!(
            "Badge {} is issued to a visitor",
            badge.serial_number
        )));
    }

    let replaced = Badge::unassign_member(&mut *tx, member.id).await?;
    let badge = Badge::assign(&mut *tx, id, member.id)
        .await
        .map_err(|e| conflict_on_unique(e, "Member already has an active badge"))?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Badge {} is assigned to another member",
                badge.serial_number
            ))
        })?;
    tx.commit().await?;

    tracing::info!(
        badge_id = %badge.id,
        member_id = %member.id,
        replaced,
        "Badge assigned"
    );

    Ok(Json(badge))
}

async fn unassign_badge(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Badge>> {
    let badge = Badge::unassign(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Badge {}", id)))?;

    tracing::info!(badge_id = %badge.id, "Badge unassigned");

    Ok(Json(badge))
}

/// Changes a badge's status. Lost or returned badges no longer identify anyone.
async fn set_badge_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BadgeStatusRequest>,
) -> Result<Json<Badge>> {
    let mut tx = state.pool.begin().await?;

    if req.status != BadgeStatus::Active {
        Badge::unassign(&mut *tx, id).await?;
    }
    let badge = Badge::set_status(&mut *tx, id, req.status)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Badge {}", id)))?;

    tx.commit().await?;

    tracing::info!(badge_id = %badge.id, status = ?badge.status, "Badge status changed");

    Ok(Json(badge))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/badges", get(list_badges).post(create_badge))
        .route("/api/badges/:id/assign", post(assign_badge))
        .route("/api/badges/:id/unassign", post(unassign_badge))
        .route("/api/badges/:id/status", post(set_badge_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn badge(status: BadgeStatus, member_id: Option<Uuid>) -> Badge {
        Badge {
            id: Uuid::new_v4(),
            serial_number: "B-0100".to_string(),
            status,
            member_id,
            assigned_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_check_assignable() {
        let member_id = Uuid::new_v4();

        assert!(check_assignable(&badge(BadgeStatus::Active, None), member_id).is_ok());
        assert!(check_assignable(&badge(BadgeStatus::Active, Some(member_id)), member_id).is_ok());
        assert!(matches!(
            check_assignable(&badge(BadgeStatus::Active, Some(Uuid::new_v4())), member_id),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            check_assignable(&badge(BadgeStatus::Lost, None), member_id),
            Err(AppError::Validation(_))
        ));
    }
}
