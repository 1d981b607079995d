//! Prometheus metrics for Prism
//!
//! Compiled with the `metrics` feature. Series live in a Prism-owned
//! [`Registry`] under the `prism` namespace, so `/metrics` carries only
//! catalog series:
//!
//! - `prism_http_requests_total{method, route, class}`
//! - `prism_http_request_duration_seconds{method, route}`
//! - `prism_operations_total{operation, status}`
//! - `prism_token_rejections_total{stage}`
//! - `prism_token_cache_entries`, sampled on every scrape

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder,
    HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const NAMESPACE: &str = "prism";

/// Label for requests that matched no route.
const UNMATCHED_ROUTE: &str = "unmatched";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec_with_registry!(
        opts!("http_requests_total", "HTTP requests by route and status class").namespace(NAMESPACE),
        &["method", "route", "class"],
        REGISTRY
    )
    .unwrap();

    // Token grants hash with bcrypt, hence the upper buckets
    static ref HTTP_LATENCY: HistogramVec = register_histogram_vec_with_registry!(
        histogram_opts!(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            vec![0.002, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 3.0]
        )
        .namespace(NAMESPACE),
        &["method", "route"],
        REGISTRY
    )
    .unwrap();

    static ref OPERATIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        opts!("operations_total", "Catalog writes and token grants").namespace(NAMESPACE),
        &["operation", "status"],
        REGISTRY
    )
    .unwrap();

    static ref TOKEN_REJECTIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        opts!("token_rejections_total", "Bearer tokens refused, by failing stage").namespace(NAMESPACE),
        &["stage"],
        REGISTRY
    )
    .unwrap();

    static ref TOKEN_CACHE_ENTRIES: IntGauge = register_int_gauge_with_registry!(
        opts!("token_cache_entries", "Token records held by the validator cache").namespace(NAMESPACE),
        REGISTRY
    )
    .unwrap();
}

/// `2xx`, `4xx` and so on.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Middleware counting requests per route template, so ids in paths never
/// become label values.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().as_str().to_owned();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ROUTE.to_owned(), |path| path.as_str().to_owned());

    let response = next.run(req).await;

    HTTP_REQUESTS
        .with_label_values(&[&method, &route, status_class(response.status())])
        .inc();
    HTTP_LATENCY
        .with_label_values(&[&method, &route])
        .observe(started.elapsed().as_secs_f64());
    response
}

/// `GET /metrics` in the Prometheus text format.
pub async fn metrics_handler(State(state): State<AppState>) -> ApiResult<Response> {
    TOKEN_CACHE_ENTRIES.set(state.tokens.cached_len() as i64);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;
    Ok(([(CONTENT_TYPE, encoder.format_type().to_owned())], buffer).into_response())
}

pub fn record_catalog_operation(operation: &str, status: &str) {
    OPERATIONS.with_label_values(&[operation, status]).inc();
}

pub fn record_auth_rejection(stage: &str) {
    TOKEN_REJECTIONS.with_label_values(&[stage]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use tempfile::tempdir;

    #[test]
    fn test_status_classes() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::UNAUTHORIZED), "4xx");
        assert_eq!(status_class(StatusCode::UNPROCESSABLE_ENTITY), "4xx");
        assert_eq!(status_class(StatusCode::SERVICE_UNAVAILABLE), "5xx");
    }

    #[tokio::test]
    async fn test_scrape_carries_prism_series() {
        let dir = tempdir().unwrap();
        let state = AppState::new(ApiConfig::for_database(dir.path().join("catalog.db"))).unwrap();
        record_catalog_operation("create_dataset", "success");
        record_auth_rejection("expired");

        let response = metrics_handler(State(state)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("prism_token_cache_entries 0"));
        assert!(text.contains(r#"prism_operations_total{operation="create_dataset",status="success"}"#));
        assert!(text.contains(r#"prism_token_rejections_total{stage="expired"}"#));
    }
}
