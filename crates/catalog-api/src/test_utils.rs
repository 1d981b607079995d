//! Test Utilities Module
//!
//! Shared infrastructure for integration testing the catalog API.
//! Enable via the `test-utils` feature flag.
//!
//! - `TestDb`: Temporary SQLite database with automatic cleanup
//! - `TestApp`: The full router over a fresh database, driven with `oneshot`
//! - `TestUser`: Builder that writes a user, an OAuth2 client and a bearer
//!   token straight into the database
//!
//! # Usage
//!
//! ```rust,ignore
//! use prism_catalog_api::test_utils::{TestApp, TestUser};
//!
//! #[tokio::test]
//! async fn test_me() {
//!     let app = TestApp::new().await.unwrap();
//!     let alice = TestUser::new("alice").create(&app).await.unwrap();
//!     let (status, body) = app.get("/api/v1/users/me", Some(&alice.token)).await;
//!     assert_eq!(status, 200);
//!     assert_eq!(body["username"], "alice");
//! }
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use prism_catalog_core::users::{StaticRole, StaticRoles, User};
use serde_json::Value;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

use crate::auth::credentials::{generate_client_credentials, generate_token, hash_password_blocking};
use crate::config::{ApiConfig, BCRYPT_MIN_COST};
use crate::error::{ApiError, ApiResult};
use crate::store;
use crate::{build_router, AppState};

/// Password given to every [`TestUser`].
pub const TEST_PASSWORD: &str = "correct-horse-battery";

// ============================================================================
// Test Database Infrastructure
// ============================================================================

/// A temporary test database that is removed when dropped.
pub struct TestDb {
    _temp_dir: TempDir,
    db_path: PathBuf,
}

impl TestDb {
    pub fn new() -> ApiResult<Self> {
        let temp_dir = tempdir()
            .map_err(|e| ApiError::Internal(format!("Failed to create temp dir: {}", e)))?;
        let db_path = temp_dir.path().join("prism_test.db");
        Ok(Self {
            _temp_dir: temp_dir,
            db_path,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.db_path
    }
}

// ============================================================================
// Test Application
// ============================================================================

/// The application router over an initialized temporary database.
pub struct TestApp {
    pub state: AppState,
    router: Router,
    _db: TestDb,
}

impl TestApp {
    pub async fn new() -> ApiResult<Self> {
        let db = TestDb::new()?;
        Self::with_config(ApiConfig::for_database(db.path()), db).await
    }

    /// Build the app with a custom configuration. `config.database_path`
    /// should point into `db`.
    pub async fn with_config(config: ApiConfig, db: TestDb) -> ApiResult<Self> {
        let state = AppState::new(config)?;
        state.db.initialize().await?;
        let router = build_router(state.clone());
        Ok(Self {
            state,
            router,
            _db: db,
        })
    }

    /// Send one request. A non-JSON or empty response body comes back as
    /// `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("valid request")).await
    }

    /// Post an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, uri: &str, form: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .expect("valid request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, token).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), token).await
    }

    pub async fn patch(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body), token).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None, token).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A stored user with a registered client and a live bearer token.
#[derive(Debug, Clone)]
pub struct TestCredentials {
    pub user: User,
    pub token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Builder for a user with a token. Defaults to an active regular user
/// holding every registered scope.
#[derive(Debug, Clone)]
pub struct TestUser {
    username: String,
    roles: StaticRoles,
    scopes: Option<BTreeSet<String>>,
    expired: bool,
}

impl TestUser {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            roles: StaticRoles::new_account(),
            scopes: None,
            expired: false,
        }
    }

    pub fn roles(mut self, roles: StaticRoles) -> Self {
        self.roles = roles;
        self
    }

    pub fn admin(mut self) -> Self {
        self.roles.set(StaticRole::Admin);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.roles.unset(StaticRole::Active);
        self
    }

    /// Grant only `scopes`, for both the client and the token.
    pub fn scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = Some(scopes.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Issue a token that expired an hour ago.
    pub fn expired(mut self) -> Self {
        self.expired = true;
        self
    }

    pub async fn create(self, app: &TestApp) -> ApiResult<TestCredentials> {
        let scopes = self
            .scopes
            .unwrap_or_else(|| app.state.scopes.names().map(str::to_string).collect());
        let password_hash = hash_password_blocking(TEST_PASSWORD, BCRYPT_MIN_COST)?;
        let (client_id, client_secret) = generate_client_credentials();
        let secret_hash = hash_password_blocking(&client_secret, BCRYPT_MIN_COST)?;
        let token = generate_token(app.state.config.token_length);
        let refresh_token = generate_token(app.state.config.token_length);
        let expires = if self.expired {
            Utc::now() - Duration::hours(1)
        } else {
            Utc::now() + Duration::seconds(app.state.config.token_ttl_secs)
        };

        let new_user = store::users::NewUser {
            username: self.username.clone(),
            email: format!("{}@example.com", self.username),
            password_hash,
            first_name: self.username.clone(),
            static_roles: self.roles,
            ..Default::default()
        };

        let (access, refresh, id) = (token.clone(), refresh_token.clone(), client_id.clone());
        let user = app
            .state
            .db
            .commit_or_abort("Failed to create test user", move |conn| {
                let user = store::users::insert(conn, &new_user)?;
                store::auth::insert_client(conn, &id, &secret_hash, user.id, &scopes, &[])?;
                store::auth::insert_token(
                    conn,
                    &store::auth::NewToken {
                        client_id: &id,
                        user_id: user.id,
                        access_token: &access,
                        refresh_token: Some(&refresh),
                        scopes: &scopes,
                        expires,
                    },
                )?;
                Ok(user)
            })
            .await?;

        Ok(TestCredentials {
            user,
            token,
            refresh_token,
            client_id,
            client_secret,
        })
    }
}
