//! OAuth2 client registration

use std::collections::BTreeSet;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use prism_catalog_core::auth::CLIENT_SCHEMA;
use prism_catalog_core::validation::FieldValidator;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{collection, respond};
use crate::auth::credentials::{generate_client_credentials, hash_password};
use crate::error::{ApiError, ApiResult};
use crate::extract::{BearerToken, Pagination, Payload};
use crate::pipeline::Guard;
use crate::store;
use crate::AppState;

pub const READ: &str = "auth:read";
pub const WRITE: &str = "auth:write";

pub const SCOPES: &[(&str, &str)] = &[
    (READ, "See your OAuth2 clients"),
    (WRITE, "Register OAuth2 clients"),
];

const BASE: &str = "/api/v1/auth/oauth2_clients";

pub fn routes() -> Router<AppState> {
    collection(Router::new(), BASE, get(list_clients).post(create_client))
}

#[derive(Debug, Deserialize)]
struct ClientFilter {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewClient {
    #[serde(default)]
    default_scopes: Vec<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

/// Clients registered by the current user. Asking for anyone else's is a
/// validation failure.
async fn list_clients(
    State(state): State<AppState>,
    token: BearerToken,
    Query(filter): Query<ClientFilter>,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let principal = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;

    let uid = principal.user.id;
    if let Some(requested) = filter.user_id.as_deref() {
        if requested.trim() != uid.to_string() {
            let mut validator = FieldValidator::new();
            validator.add("user_id", "You can only see your own OAuth2 clients.");
            validator.finish()?;
        }
    }

    let clients = state
        .db
        .read(move |conn| Ok(store::auth::list_clients(conn, uid, page)?))
        .await?;
    respond(&CLIENT_SCHEMA, &clients)
}

/// Register a client. The generated secret appears in this response only.
async fn create_client(
    State(state): State<AppState>,
    token: BearerToken,
    request: Result<Payload<NewClient>, ApiError>,
) -> ApiResult<Json<Value>> {
    let principal = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Payload(request) = request?;

    let default_scopes: BTreeSet<String> = request
        .default_scopes
        .iter()
        .flat_map(|scope| scope.split_whitespace())
        .map(str::to_string)
        .collect();

    let mut validator = FieldValidator::new();
    if default_scopes.is_empty() {
        validator.add("default_scopes", "Missing data for required field.");
    }
    for scope in state.scopes.unknown(&default_scopes) {
        validator.add("default_scopes", format!("Unknown scope \"{}\"", scope));
    }
    validator.finish()?;

    let (client_id, client_secret) = generate_client_credentials();
    let secret_hash = hash_password(client_secret.clone(), state.config.bcrypt_cost).await?;

    let uid = principal.user.id;
    let redirect_uris = request.redirect_uris;
    let client = state
        .db
        .commit_or_abort("Failed to create OAuth2 client", move |conn| {
            Ok(store::auth::insert_client(
                conn,
                &client_id,
                &secret_hash,
                uid,
                &default_scopes,
                &redirect_uris,
            )?)
        })
        .await?;

    info!(user_id = uid, client_id = %client.client_id, "OAuth2 client registered");
    crate::record_operation("create_client", "success");

    let Json(mut body) = respond(&CLIENT_SCHEMA, &client)?;
    body["client_secret"] = json!(client_secret);
    Ok(Json(body))
}
