mod cleanup;
mod config;
mod gateway;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::api_router;
use parley_api::auth::{AppState, AppStateInner};
use parley_db::Database;
use parley_gateway::Hub;

use crate::config::Config;
use crate::gateway::{GatewayState, ws_upgrade};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    let hub = Hub::new(db.clone(), config.hub_config());
    let app_state: AppState = Arc::new(AppStateInner {
        hub,
        jwt_secret: config.jwt_secret.clone(),
    });

    tokio::spawn(cleanup::run_status_sweep(db, config.status_sweep));

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(GatewayState {
        app: app_state.clone(),
        heartbeat: config.heartbeat,
    });

    let app = Router::new()
        .merge(api_router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Parley server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
