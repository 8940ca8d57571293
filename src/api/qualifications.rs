use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::api::{conflict_on_unique, required};
use crate::error::{AppError, Result};
use crate::models::{
    qualification::{CreateQualificationTypeData, UpdateQualificationTypeData},
    QualificationType,
};

#[derive(Debug, Deserialize)]
pub struct CreateQualificationTypeRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub grants_lockup: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQualificationTypeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub grants_lockup: Option<bool>,
}

/// Codes are stored upper-case with underscores, e.g. `BLDG_SEC`
fn normalize_code(code: &str) -> Result<String> {
    let code = required("code", code)?.to_uppercase().replace([' ', '-'], "_");

    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Validation(format!(
            "Qualification code '{}' may only contain letters, digits and underscores",
            code
        )));
    }
    Ok(code)
}

async fn list_types(State(state): State<AppState>) -> Result<Json<Vec<QualificationType>>> {
    Ok(Json(QualificationType::list(&state.pool).await?))
}

async fn create_type(
    State(state): State<AppState>,
    Json(req): Json<CreateQualificationTypeRequest>,
) -> Result<(StatusCode, Json<QualificationType>)> {
    let data = CreateQualificationTypeData {
        code: normalize_code(&req.code)?,
        name: required("name", &req.name)?,
        description: req.description,
        grants_lockup: req.grants_lockup,
    };

    let qualification_type = QualificationType::create(&state.pool, data)
        .await
        .map_err(|e| conflict_on_unique(e, "A qualification type with this code already exists"))?;

    tracing::info!(
        qualification_type_id = %qualification_type.id,
        code = %qualification_type.code,
        grants_lockup = qualification_type.grants_lockup,
        "Qualification type created"
    );

    Ok((StatusCode::CREATED, Json(qualification_type)))
}

async fn update_type(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateQualificationTypeRequest>,
) -> Result<Json<QualificationType>> {
    let data = UpdateQualificationTypeData {
        name: req.name.map(|name| required("name", &name)).transpose()?,
        description: req.description,
        grants_lockup: req.grants_lockup,
    };

    let qualification_type = QualificationType::update(&state.pool, id, data)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Qualification type {}", id)))?;

    tracing::info!(qualification_type_id = %id, "Qualification type updated");

    Ok(Json(qualification_type))
}

/// Deletes an unused qualification type
async fn delete_type(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let mut tx = state.pool.begin().await?;

    let grants = QualificationType::count_grants(&mut *tx, id).await?;
    if grants > 0 {
        return Err(AppError::Conflict(format!(
            "Qualification type is granted to {} member(s)",
            grants
        )));
    }

    if !QualificationType::delete(&mut *tx, id).await? {
        return Err(AppError::NotFound(format!("Qualification type {}", id)));
    }
    tx.commit().await?;

    tracing::info!(qualification_type_id = %id, "Qualification type deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/qualification-types", get(list_types).post(create_type))
        .route(
            "/api/qualification-types/:id",
            patch(update_type).delete(delete_type),
        )
}
