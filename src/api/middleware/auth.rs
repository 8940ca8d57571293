use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::{SESSION_KEY_ADMIN_ID, SESSION_KEY_ADMIN_ROLE};
use crate::error::AppError;
use crate::models::AdminRole;

pub(crate) fn session_error(error: tower_sessions::session::Error) -> AppError {
    AppError::Internal(anyhow::anyhow!("Session error: {}", error))
}

/// Middleware that requires an administrator session
pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let admin_id: Option<Uuid> = session
        .get(SESSION_KEY_ADMIN_ID)
        .await
        .map_err(session_error)?;

    if admin_id.is_none() {
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// The administrator behind the current session
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedAdmin {
    pub admin_id: Uuid,
    pub role: AdminRole,
}

impl AuthenticatedAdmin {
    pub fn require_role(&self, role: AdminRole) -> Result<(), AppError> {
        if self.role == role || self.role == AdminRole::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "This action requires the {:?} role",
                role
            )))
        }
    }
}

/// Extracts the authenticated administrator from the session
pub async fn get_authenticated_admin(session: &Session) -> Result<AuthenticatedAdmin, AppError> {
    let admin_id: Uuid = session
        .get(SESSION_KEY_ADMIN_ID)
        .await
        .map_err(session_error)?
        .ok_or(AppError::Unauthorized)?;

    let role: AdminRole = session
        .get(SESSION_KEY_ADMIN_ROLE)
        .await
        .map_err(session_error)?
        .ok_or(AppError::Unauthorized)?;

    Ok(AuthenticatedAdmin { admin_id, role })
}
