//! OAuth2 token endpoint
//!
//! Supports the resource-owner password grant and the refresh-token grant.
//! Every issued token carries a refresh token; refreshing rotates both.
//!
//! Failures are reported with the same opaque 401 the validator uses, so a
//! caller cannot tell an unknown client from a wrong password. The reason is
//! logged at `warn`.

use std::collections::BTreeSet;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use prism_catalog_core::auth::{join_scopes, parse_scopes};
use prism_catalog_core::OAuth2Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::credentials::{generate_token, verify_password};
use crate::config::ScopeRegistry;
use crate::error::{ApiError, ApiResult};
use crate::extract::FormOrJson;
use crate::store::{self, auth::NewToken};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/oauth2/token", post(issue_token))
        .route("/auth/oauth2/revoke", post(revoke_token))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub token: String,
}

fn deny(reason: &str) -> ApiError {
    warn!(reason, "Token request denied");
    ApiError::Unauthenticated
}

/// Scopes to grant for a request. An absent or blank `scope` means
/// everything in `allowed`; otherwise each requested scope must be
/// registered and within `allowed`.
pub fn narrow_scopes(
    registry: &ScopeRegistry,
    allowed: &BTreeSet<String>,
    requested: Option<&str>,
) -> Result<BTreeSet<String>, &'static str> {
    let requested = match requested {
        Some(raw) if !raw.trim().is_empty() => parse_scopes(raw),
        _ => return Ok(allowed.clone()),
    };
    if !registry.unknown(&requested).is_empty() {
        return Err("unknown scope requested");
    }
    if !requested.is_subset(allowed) {
        return Err("requested scopes exceed the grant");
    }
    Ok(requested)
}

async fn issue_token(
    State(state): State<AppState>,
    FormOrJson(request): FormOrJson<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    match request.grant_type.as_str() {
        "password" => password_grant(&state, request).await,
        "refresh_token" => refresh_grant(&state, request).await,
        other => Err(ApiError::BadRequest(format!(
            "Unsupported grant type \"{}\"",
            other
        ))),
    }
}

/// Check a client's credentials. Both the password and the refresh grant
/// require them.
async fn authenticate_client(
    state: &AppState,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> ApiResult<OAuth2Client> {
    let (client_id, client_secret) = match (client_id, client_secret) {
        (Some(id), Some(secret)) => (id, secret),
        _ => return Err(deny("missing client credentials")),
    };

    let client = state
        .db
        .read(move |conn| Ok(store::auth::find_client(conn, &client_id)?))
        .await?;
    let (client, secret_hash) = client.ok_or_else(|| deny("unknown client"))?;
    if !verify_password(client_secret, secret_hash).await? {
        return Err(deny("client secret mismatch"));
    }
    Ok(client)
}

async fn password_grant(state: &AppState, request: TokenRequest) -> ApiResult<Json<TokenResponse>> {
    let client = authenticate_client(state, request.client_id, request.client_secret).await?;
    let (username, password) = match (request.username, request.password) {
        (Some(username), Some(password)) => (username, password),
        _ => return Err(deny("missing user credentials")),
    };

    let credentials = state
        .db
        .read(move |conn| Ok(store::users::find_credentials(conn, &username)?))
        .await?;

    let (user, password_hash) = credentials.ok_or_else(|| deny("unknown user"))?;
    if !verify_password(password, password_hash).await? {
        return Err(deny("password mismatch"));
    }
    if !user.is_active() {
        return Err(deny("user is not active"));
    }

    let scopes = narrow_scopes(&state.scopes, &client.default_scopes, request.scope.as_deref())
        .map_err(deny)?;
    issue(state, client.client_id, user.id, scopes, None).await
}

async fn refresh_grant(state: &AppState, request: TokenRequest) -> ApiResult<Json<TokenResponse>> {
    let client = authenticate_client(state, request.client_id, request.client_secret).await?;
    let raw = request
        .refresh_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| deny("missing refresh token"))?;

    let lookup = raw.clone();
    let (token, user) = state
        .db
        .read(move |conn| {
            let token = store::auth::find_by_refresh_token(conn, &lookup)?;
            let user = match &token {
                Some(token) => store::users::find_by_id(conn, token.user_id)?,
                None => None,
            };
            Ok((token, user))
        })
        .await?;

    let token = token.ok_or_else(|| deny("unknown refresh token"))?;
    if token.client_id != client.client_id {
        return Err(deny("refresh token belongs to another client"));
    }
    let user = user.ok_or_else(|| deny("token owner no longer exists"))?;
    if !user.is_active() {
        return Err(deny("user is not active"));
    }

    let scopes =
        narrow_scopes(&state.scopes, &token.scopes, request.scope.as_deref()).map_err(deny)?;
    issue(state, token.client_id, user.id, scopes, Some((token.id, raw))).await
}

/// Store a fresh token pair. `replacing` is the token id and refresh token
/// being exchanged; it is consumed in the same transaction, and a refresh
/// token someone else consumed first fails the request.
async fn issue(
    state: &AppState,
    client_id: String,
    user_id: i64,
    scopes: BTreeSet<String>,
    replacing: Option<(i64, String)>,
) -> ApiResult<Json<TokenResponse>> {
    let expires_in = state.config.token_ttl_secs;
    let response = TokenResponse {
        access_token: generate_token(state.config.token_length),
        token_type: "Bearer",
        expires_in,
        refresh_token: generate_token(state.config.token_length),
        scope: join_scopes(&scopes),
    };

    let access_token = response.access_token.clone();
    let refresh_token = response.refresh_token.clone();
    let rotating = replacing.is_some();
    let issued_to = client_id.clone();
    state
        .db
        .commit_or_abort("Failed to issue token", move |conn| {
            if let Some((id, old_refresh)) = replacing {
                if !store::auth::consume_refresh_token(conn, id, &old_refresh)? {
                    return Err(deny("refresh token already used"));
                }
            }
            store::auth::insert_token(
                conn,
                &NewToken {
                    client_id: &client_id,
                    user_id,
                    access_token: &access_token,
                    refresh_token: Some(&refresh_token),
                    scopes: &scopes,
                    expires: Utc::now() + Duration::seconds(expires_in),
                },
            )?;
            Ok(())
        })
        .await?;

    if rotating {
        state.tokens.clear_cache();
    }
    info!(user_id, client_id = %issued_to, scope = %response.scope, rotating, "Access token issued");
    crate::record_operation("issue_token", "success");
    Ok(Json(response))
}

/// Revoke an access or refresh token. Unknown tokens are not an error.
async fn revoke_token(
    State(state): State<AppState>,
    FormOrJson(request): FormOrJson<RevokeRequest>,
) -> ApiResult<Json<Value>> {
    let token = request.token;
    let removed = state
        .db
        .commit_or_abort("Failed to revoke token", move |conn| {
            Ok(store::auth::revoke(conn, &token)?)
        })
        .await?;

    state.tokens.clear_cache();
    debug!(removed, "Token revocation processed");
    Ok(Json(json!({})))
}
