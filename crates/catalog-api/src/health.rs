//! Liveness and readiness endpoints
//!
//! `/health` and `/live` answer as long as the process serves requests.
//! `/ready` also requires the catalog database to hold the tables the API
//! reads on every request; a freshly created, empty SQLite file is not ready.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};

use crate::AppState;

/// Tables that must exist before any guarded request can succeed.
pub const REQUIRED_TABLES: &[&str] = &["users", "oauth2_clients", "oauth2_tokens", "datasets", "stories"];

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub database: DatabaseReport,
}

#[derive(Debug, Default, Serialize)]
pub struct DatabaseReport {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_tables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatabaseReport {
    fn is_ready(&self) -> bool {
        self.reachable && self.missing_tables.is_empty()
    }
}

/// Plain-text check for load balancers.
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn liveness_check() -> Json<Liveness> {
    Json(Liveness {
        status: "alive",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// 200 once the schema is in place, 503 otherwise.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let database = inspect_database(&state).await;
    let ready = database.is_ready();
    if ready {
        debug!(latency_ms = ?database.latency_ms, "Readiness check passed");
    } else {
        warn!(
            missing = ?database.missing_tables,
            error = ?database.error,
            "Readiness check failed"
        );
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(Readiness { ready, database }))
}

async fn inspect_database(state: &AppState) -> DatabaseReport {
    let start = Instant::now();
    match state.db.read(|conn| Ok(missing_tables(conn)?)).await {
        Ok(missing_tables) => DatabaseReport {
            reachable: true,
            missing_tables,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => DatabaseReport {
            error: Some(e.to_string()),
            ..DatabaseReport::default()
        },
    }
}

/// Names from [`REQUIRED_TABLES`] the database does not contain.
pub fn missing_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        if !stmt.exists([table])? {
            missing.push(table.to_string());
        }
    }
    Ok(missing)
}
