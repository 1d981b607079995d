//! Prism Catalog API Server
//!
//! REST API for the Prism data catalog.

use prism_catalog_api::config::ApiConfig;
use prism_catalog_api::{build_router, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ApiConfig::from_env();
    let port = config.port;
    tracing::info!("Using catalog at: {}", config.database_path.display());

    let state = AppState::new(config).unwrap_or_else(|e| {
        tracing::error!("Failed to build application state: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = state.db.initialize().await {
        tracing::error!("Failed to initialize catalog: {}", e);
        std::process::exit(1);
    }
    tracing::info!(scopes = state.scopes.len(), "OAuth2 scopes registered");

    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Prism API listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
