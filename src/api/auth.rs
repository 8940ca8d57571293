use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sqlx::PgPool;
use tower_sessions::Session;

use crate::api::middleware::{
    auth::{get_authenticated_admin, session_error},
    session::{AppState, SESSION_KEY_ADMIN_ID, SESSION_KEY_ADMIN_ROLE},
};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{AdminRole, AdminUser};
use crate::services::password::{hash_password, verify_password};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Runs the PBKDF2 check on the blocking pool
async fn check_password(password: String, stored: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Password check aborted: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Stored hash unreadable: {}", e)))
}

/// Logs an administrator in and starts a session
async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AdminUser>> {
    let admin = AdminUser::find_by_username(&state.pool, req.username.trim()).await?;

    // Unknown user and wrong password are indistinguishable to the caller
    let Some(admin) = admin else {
        tracing::warn!(username = %req.username, "Login attempt for unknown user");
        return Err(AppError::Unauthorized);
    };

    let valid = check_password(req.password, admin.password_hash.clone()).await?;
    if !valid {
        tracing::warn!(admin_id = %admin.id, "Login attempt with wrong password");
        return Err(AppError::Unauthorized);
    }

    session.cycle_id().await.map_err(session_error)?;
    session
        .insert(SESSION_KEY_ADMIN_ID, admin.id)
        .await
        .map_err(session_error)?;
    session
        .insert(SESSION_KEY_ADMIN_ROLE, admin.role)
        .await
        .map_err(session_error)?;

    AdminUser::touch_last_login(&state.pool, admin.id).await?;

    tracing::info!(admin_id = %admin.id, role = ?admin.role, "Administrator logged in");

    Ok(Json(admin))
}

/// Logs out the current administrator
async fn logout(session: Session) -> Result<StatusCode> {
    session.flush().await.map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the administrator behind the session
async fn me(State(state): State<AppState>, session: Session) -> Result<Json<AdminUser>> {
    let current = get_authenticated_admin(&session).await?;

    let admin = AdminUser::find_by_id(&state.pool, current.admin_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(admin))
}

/// Creates the configured first administrator when no administrator exists yet.
pub async fn bootstrap_admin(pool: &PgPool, config: &Config) -> Result<Option<AdminUser>> {
    let (Some(username), Some(password)) = (
        config.bootstrap_admin_username.as_deref(),
        config.bootstrap_admin_password.as_ref(),
    ) else {
        return Ok(None);
    };

    if AdminUser::count(pool).await? > 0 {
        return Ok(None);
    }

    let password_hash = hash_password(password.expose_secret())
        .map_err(|e| AppError::Validation(format!("Bootstrap admin password: {}", e)))?;
    let admin =
        AdminUser::create(pool, username, username, &password_hash, AdminRole::Admin).await?;

    tracing::info!(
        admin_id = %admin.id,
        username = %admin.username,
        "Bootstrap administrator created"
    );

    Ok(Some(admin))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}
