//! API error type and the error envelope
//!
//! Every failure a handler can produce maps onto one [`ApiError`] variant,
//! and every variant renders the same envelope:
//!
//! - `422`: `{"status": 422, "message": {"<field>": ["<message>", ...]}}`
//! - everything else: `{"message": "<text>"}`
//!
//! Internal details (SQL errors, join errors) are logged and never sent to
//! the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use prism_catalog_core::{CatalogError, FieldErrors};
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

const UNAUTHENTICATED_MESSAGE: &str = "The server could not verify that you are authorized to access the URL requested.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing, unknown or expired token, or a token without a required
    /// scope. The response never says which.
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0:?}")]
    ValidationFailed(FieldErrors),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) if self.is_constraint_violation() => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A single-field 422.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        ApiError::ValidationFailed(errors)
    }

    /// Whether the error is a storage-level constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            ApiError::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Sqlite(e) => ApiError::Database(e),
            err @ CatalogError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CatalogError::ConflictError(msg) => ApiError::Conflict(msg),
            CatalogError::ValidationError(msg) => ApiError::field("_schema", msg),
            CatalogError::InvalidFields(fields) => ApiError::ValidationFailed(fields),
            CatalogError::InvalidPatch(msg) => ApiError::BadRequest(msg),
            CatalogError::SerializationError(msg) | CatalogError::Other(msg) => {
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(format!("Serialization error: {}", err))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Task join error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::ValidationFailed(fields) => json!({
                "status": status.as_u16(),
                "message": fields,
            }),
            ApiError::Unauthenticated => json!({ "message": UNAUTHENTICATED_MESSAGE }),
            ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::BadRequest(msg) => json!({ "message": msg }),
            ApiError::Database(e) if status == StatusCode::CONFLICT => {
                json!({ "message": format!("Constraint violated: {}", e) })
            }
            ApiError::Database(e) => {
                error!(error = %e, "Unhandled database error");
                json!({ "message": "Internal server error" })
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                json!({ "message": "Internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_envelope() {
        let (status, body) = render(ApiError::field("limit", "Must be between 1 and 100.")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);
        assert_eq!(body["message"]["limit"][0], "Must be between 1 and 100.");
    }

    #[tokio::test]
    async fn test_generic_envelope() {
        let (status, body) = render(ApiError::Conflict("Unlinked already".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, serde_json::json!({"message": "Unlinked already"}));
    }

    #[tokio::test]
    async fn test_unauthenticated_has_no_detail() {
        let (status, body) = render(ApiError::Unauthenticated).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.as_object().unwrap().len(), 1);
        assert!(!body["message"].as_str().unwrap().contains("scope"));
    }

    #[tokio::test]
    async fn test_internal_errors_are_opaque() {
        let (status, body) = render(ApiError::Internal("disk on fire".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[test]
    fn test_catalog_error_mapping() {
        let not_found: ApiError = CatalogError::not_found("User", 99).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert!(not_found.to_string().contains("99"));

        let patch: ApiError = CatalogError::InvalidPatch("bad path".into()).into();
        assert_eq!(patch.status(), StatusCode::BAD_REQUEST);

        let invalid: ApiError = CatalogError::field("name", "required").into();
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
