//! tumorscan - brain MRI tumor classification web app

use anyhow::Result;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tumorscan::{
    api::{self, AppState},
    classifier::download::{ensure_artifact, ArtifactStatus},
    config::Config,
    db,
    theme::ThemeEngine,
};

/// How often expired sessions are purged
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tumorscan=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tumorscan...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Fetch the model artifact if it is missing
    match ensure_artifact(&config.model.path, config.model.download_url.as_deref()).await {
        Ok(ArtifactStatus::Present) => {
            tracing::info!("Model artifact: {}", config.model.path.display())
        }
        Ok(ArtifactStatus::Downloaded) => {
            tracing::info!("Model artifact downloaded to {}", config.model.path.display())
        }
        Ok(ArtifactStatus::Missing) => tracing::warn!(
            "No model artifact at {}; predictions will be unavailable",
            config.model.path.display()
        ),
        Err(e) => tracing::warn!("Failed to download model artifact: {:#}", e),
    }

    // Initialize theme engine
    let theme_engine = ThemeEngine::new()?;
    tracing::info!("Templates loaded");

    // Build application state
    let state = AppState::new(pool, &config, theme_engine);

    if config.auth.reset_sessions_on_start {
        let removed = state.account_service.reset_sessions().await?;
        tracing::info!("Cleared {} sessions", removed);
    }

    // Start session cleanup task
    {
        let account_service = state.account_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                SESSION_CLEANUP_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                match account_service.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!("Removed {} expired sessions", removed),
                    Err(e) => tracing::warn!("Session cleanup failed: {}", e),
                }
            }
        });
    }

    // Build router
    let pool = state.pool.clone();
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
