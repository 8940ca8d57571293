use axum::extract::FromRef;
use sqlx::PgPool;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::Config;
use crate::services::live::LiveFeed;

/// Session keys used in the application
pub const SESSION_KEY_ADMIN_ID: &str = "admin_id";
pub const SESSION_KEY_ADMIN_ROLE: &str = "admin_role";

const SESSION_INACTIVITY_HOURS: i64 = 12;

/// Wraps a session store in the layer settings shared by every environment
pub fn session_layer<S: SessionStore + Clone>(store: S, secure: bool) -> SessionManagerLayer<S> {
    SessionManagerLayer::new(store)
        .with_secure(secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(
            SESSION_INACTIVITY_HOURS,
        )))
}

/// Creates the PostgreSQL-backed session layer for Axum
pub async fn create_session_layer(
    pool: PgPool,
    base_url: &str,
) -> Result<SessionManagerLayer<PostgresStore>, sqlx::Error> {
    let session_store = PostgresStore::new(pool);
    session_store.migrate().await?;

    // Cookies are only marked secure when served over HTTPS
    Ok(session_layer(session_store, base_url.starts_with("https://")))
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub feed: LiveFeed,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}

impl FromRef<AppState> for LiveFeed {
    fn from_ref(state: &AppState) -> LiveFeed {
        state.feed.clone()
    }
}
