//! Prism Catalog API Library
//!
//! REST backend for the Prism data catalog: OAuth2 bearer tokens, a typed
//! authorization pipeline, and resources for users, datasets and their
//! provenance, stories and comments. The `prism-api` binary serves the
//! router built by [`build_router`].

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod health;
pub mod pipeline;
pub mod resources;
pub mod store;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "test-utils")]
pub mod test_utils;

use crate::auth::TokenValidator;
use crate::config::{ApiConfig, ScopeRegistry};
use crate::db::Database;
use crate::error::ApiResult;
use crate::pipeline::{AllowAllWrites, WriteAccessPolicy};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<ApiConfig>,
    pub scopes: Arc<ScopeRegistry>,
    pub tokens: Arc<TokenValidator>,
    pub write_policy: Arc<dyn WriteAccessPolicy>,
}

impl AppState {
    /// State for `config`, with every declared scope registered and writes
    /// open to any authorized user. The database is not touched.
    pub fn new(config: ApiConfig) -> ApiResult<Self> {
        let db = Database::new(config.database_path.clone());
        let scopes = ScopeRegistry::with_defaults()?;
        let tokens = TokenValidator::new(db.clone(), config.token_cache_ttl);
        Ok(Self {
            db,
            config: Arc::new(config),
            scopes: Arc::new(scopes),
            tokens: Arc::new(tokens),
            write_policy: Arc::new(AllowAllWrites),
        })
    }

    /// Replace the write-access policy.
    pub fn with_write_policy(mut self, policy: Arc<dyn WriteAccessPolicy>) -> Self {
        self.write_policy = policy;
        self
    }
}

/// The full application router with CORS and, when enabled, metrics.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health::health_check))
        .route("/live", get(health::liveness_check))
        .route("/ready", get(health::readiness_check))
        .merge(auth::oauth2::routes())
        .merge(resources::router());

    #[cfg(feature = "metrics")]
    let router = router
        .route("/metrics", get(metrics::metrics_handler))
        .layer(axum::middleware::from_fn(metrics::track_metrics));

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Count a successful or failed catalog operation.
pub(crate) fn record_operation(operation: &str, status: &str) {
    #[cfg(feature = "metrics")]
    metrics::record_catalog_operation(operation, status);
    #[cfg(not(feature = "metrics"))]
    let _ = (operation, status);
}

/// Count a refused bearer token.
pub(crate) fn record_rejection(stage: &str) {
    #[cfg(feature = "metrics")]
    metrics::record_auth_rejection(stage);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}
