//! # mmkt-api — Binary Entry Point
//!
//! Starts the Axum HTTP server for the marketplace settlement core.
//! Binds to a configurable port (default 8080).

use mmkt_api::state::{AppConfig, AppState, MarketCore};
use mmkt_core::FeeRate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Build configuration from environment.
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let auth_token = std::env::var("AUTH_TOKEN")
        .ok()
        .map(mmkt_api::auth::SecretToken::new);
    let fee_rate = match std::env::var("PLATFORM_FEE_BPS").ok().and_then(|v| v.parse().ok()) {
        Some(bps) => FeeRate::from_bps(bps).map_err(|e| {
            tracing::error!("Invalid PLATFORM_FEE_BPS: {e}");
            e
        })?,
        None => AppConfig::default().fee_rate,
    };
    let config = AppConfig {
        port,
        auth_token,
        fee_rate,
    };

    if config.auth_token.is_none() {
        tracing::warn!("AUTH_TOKEN not set; the admin surface is open (development mode)");
    }

    // Initialize database pool (optional — absent means in-memory only).
    let db_pool = mmkt_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let state = AppState::new(config, db_pool, MarketCore::default());

    // Hydrate the in-memory core from the database (if connected).
    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    let app = mmkt_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("mmkt API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
