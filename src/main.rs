use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel::api::middleware::session::{create_session_layer, AppState};
use sentinel::api::{self, auth::bootstrap_admin};
use sentinel::config::Config;
use sentinel::db;
use sentinel::jobs;
use sentinel::services::live::LiveFeed;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sentinel server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        timezone_offset_minutes = config.timezone_offset_minutes,
        "Configuration loaded successfully"
    );

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    if let Some(admin) = bootstrap_admin(&pool, &config)
        .await
        .context("Failed to create bootstrap administrator")?
    {
        tracing::info!(username = %admin.username, "Bootstrap administrator ready");
    }

    // Create session layer
    let session_layer = create_session_layer(pool.clone(), &config.base_url).await?;
    tracing::info!("Session layer initialized");

    let feed = LiveFeed::default();

    // Start background jobs
    let mut scheduler = jobs::start_scheduler(pool.clone(), feed.clone(), config.clone())
        .await
        .context("Failed to start job scheduler")?;

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        feed,
    };

    let app = api::router(state, session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let ip: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST '{}'", config.host))?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    pool.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
