use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;

use super::session::AppState;
use crate::error::AppError;
use crate::services::password::keys_match;

pub const KIOSK_KEY_HEADER: &str = "x-kiosk-key";
pub const KIOSK_ID_HEADER: &str = "x-kiosk-id";

/// Middleware that requires the shared kiosk key
pub async fn require_kiosk_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(KIOSK_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    if !keys_match(presented, state.config.kiosk_api_key.expose_secret()) {
        tracing::warn!("Rejected kiosk request with invalid key");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

/// The terminal identifier a kiosk sends along with its requests
pub fn kiosk_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(KIOSK_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
