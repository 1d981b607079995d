//! REST resources
//!
//! One module per resource family. Each declares the OAuth2 scopes it uses
//! and builds its routes; [`router`] assembles them.

use axum::routing::MethodRouter;
use axum::{Json, Router};
use prism_catalog_core::patch::{parse_operations, PatchOperation, PatchSpec};
use prism_catalog_core::schema::Schema;
use prism_catalog_core::validation::FieldValidator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub mod auth;
pub mod comments;
pub mod datasets;
pub mod provenance;
pub mod stories;
pub mod users;

/// Every scope any resource declares, with its description.
pub fn declared_scopes() -> Vec<(&'static str, &'static str)> {
    [
        users::SCOPES,
        datasets::SCOPES,
        stories::SCOPES,
        comments::SCOPES,
        auth::SCOPES,
    ]
    .concat()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(users::routes())
        .merge(auth::routes())
        .merge(datasets::routes())
        .merge(provenance::routes())
        .merge(stories::routes())
        .merge(comments::routes())
}

/// Route `path` both with and without a trailing slash.
pub(crate) fn collection(
    router: Router<AppState>,
    path: &str,
    methods: MethodRouter<AppState>,
) -> Router<AppState> {
    router
        .route(path, methods.clone())
        .route(&format!("{}/", path), methods)
}

/// Project `value` through `schema` into a JSON response.
pub(crate) fn respond<T: Serialize + ?Sized>(schema: &Schema, value: &T) -> ApiResult<Json<Value>> {
    Ok(Json(schema.serialize(value)?))
}

/// Parse a patch body and check every operation against `spec`.
pub(crate) fn patch_operations(spec: &PatchSpec, body: &Value) -> ApiResult<Vec<PatchOperation>> {
    let ops = parse_operations(body)?;
    spec.validate(&ops)?;
    Ok(ops)
}

/// A non-blank string member of a JSON object.
pub(crate) fn string_field(payload: &Map<String, Value>, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Record a missing-field error, or run `check` on the value.
pub(crate) fn required(
    validator: &mut FieldValidator,
    field: &str,
    value: Option<&str>,
    check: fn(&str) -> prism_catalog_core::Result<()>,
) {
    match value {
        Some(value) if !value.trim().is_empty() => {
            validator.check(field, check(value));
        }
        _ => {
            validator.require(field, None);
        }
    }
}

/// Deserialize an entity from loaded input fields. Entries in `fixed`
/// override whatever the client sent.
pub(crate) fn build_entity<T: DeserializeOwned>(
    mut fields: Map<String, Value>,
    fixed: Value,
) -> ApiResult<T> {
    if let Value::Object(fixed) = fixed {
        fields.extend(fixed);
    }
    serde_json::from_value(Value::Object(fields)).map_err(|e| ApiError::field("_schema", e.to_string()))
}
