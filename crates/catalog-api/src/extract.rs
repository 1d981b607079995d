//! Request extractors
//!
//! Each one rejects with an [`ApiError`], so malformed input is reported in
//! the same envelope as every other failure.
//!
//! Guarded handlers take [`Payload`] and [`Pagination`] as
//! `Result<_, ApiError>` and unwrap them after the guard has run, so a bad
//! token is answered with 401 even when the body or query is also invalid.

use std::collections::HashMap;

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::{Form, Json};
use prism_catalog_core::validation::{validate_pagination, FieldValidator};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::validator::{reject, Rejection};
use crate::config::DEFAULT_PAGE_LIMIT;
use crate::error::{ApiError, ApiResult};
use crate::store::Page;
use crate::AppState;

/// The raw token from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl BearerToken {
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
            return None;
        }
        Some(BearerToken(token.to_string()))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerToken::from_header)
            .ok_or_else(|| reject(Rejection::MissingToken))
    }
}

/// A JSON body decoded into `T`. Unreadable JSON and payloads of the wrong
/// shape are validation failures.
#[derive(Debug, Clone)]
pub struct Payload<T = Value>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> ApiResult<Self> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::field("_schema", rejection.body_text()))?;
        serde_json::from_value(value)
            .map(Payload)
            .map_err(|e| ApiError::field("_schema", e.to_string()))
    }
}

/// A body accepted either as JSON or as a url-encoded form, chosen by the
/// request's content type. OAuth2 clients send forms.
#[derive(Debug, Clone)]
pub struct FormOrJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> ApiResult<Self> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |content_type| content_type.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::field("_schema", rejection.body_text()))?;
            Ok(FormOrJson(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::field("_schema", rejection.body_text()))?;
            Ok(FormOrJson(value))
        }
    }
}

/// `offset`/`limit` query parameters, bounded by the configured maximum.
#[derive(Debug, Clone, Copy)]
pub struct Pagination(pub Page);

fn parse_param(
    params: &HashMap<String, String>,
    name: &str,
    default: i64,
    validator: &mut FieldValidator,
) -> i64 {
    match params.get(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            validator.add(name, "Not a valid integer.");
            default
        }),
    }
}

pub fn page_from_query(params: &HashMap<String, String>, max_limit: i64) -> ApiResult<Page> {
    let mut validator = FieldValidator::new();
    let offset = parse_param(params, "offset", 0, &mut validator);
    let limit = parse_param(params, "limit", DEFAULT_PAGE_LIMIT.min(max_limit), &mut validator);
    validator.finish()?;
    validate_pagination(offset, limit, max_limit)?;
    Ok(Page::new(offset, limit))
}

#[async_trait]
impl FromRequestParts<AppState> for Pagination {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let Query(params) = Query::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::field("_schema", rejection.body_text()))?;
        page_from_query(&params, state.config.pagination_max_limit).map(Pagination)
    }
}
