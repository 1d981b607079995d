//! User registration, profiles, follows and per-user listings

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use prism_catalog_core::comments::COMMENT_SCHEMA;
use prism_catalog_core::datasets::{
    LICENSE_SCHEMA, ORGANIZATION_SCHEMA, PUBLISHER_SCHEMA, REFERENCE_SCHEMA, SOURCE_SCHEMA,
};
use prism_catalog_core::patch::take_operations;
use prism_catalog_core::users::{StaticRole, StaticRoles, ROLE_PATCH_FIELDS, USER_PATCH, USER_SCHEMA};
use prism_catalog_core::validation::{
    validate_email, validate_password, validate_username, FieldValidator,
};
use prism_catalog_core::{
    Comment, Dataset, License, Organization, Publisher, Reference, Source, Story, User,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{collection, patch_operations, required, respond};
use crate::auth::credentials::hash_password;
use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::extract::{BearerToken, Pagination, Payload};
use crate::pipeline::{Authorized, Guard, Permission};
use crate::store::{self, users::NewUser, Entity};
use crate::AppState;

pub const READ: &str = "users:read";
pub const WRITE: &str = "users:write";

pub const SCOPES: &[(&str, &str)] = &[
    (READ, "Read user profiles, followers and contributions"),
    (WRITE, "Update user profiles and follow other users"),
];

const BASE: &str = "/api/v1/users";

pub fn routes() -> Router<AppState> {
    collection(Router::new(), BASE, get(list_users).post(create_user))
        .route("/api/v1/users/signup_form", get(signup_form))
        .route("/api/v1/users/me", get(me))
        .route("/api/v1/users/followers", get(followers))
        .route("/api/v1/users/following", get(following))
        .route("/api/v1/users/following/:user_id", patch(follow).delete(unfollow))
        .route("/api/v1/users/comments", get(my_comments))
        .route("/api/v1/users/datasets", get(my_datasets))
        .route("/api/v1/users/references", get(my_references))
        .route("/api/v1/users/sources", get(my_sources))
        .route("/api/v1/users/licenses", get(my_licenses))
        .route("/api/v1/users/organizations", get(my_organizations))
        .route("/api/v1/users/publishers", get(my_publishers))
        .route("/api/v1/users/stories", get(my_stories))
        .route("/api/v1/users/:user_id", get(get_user).patch(patch_user))
}

async fn current_user(state: &AppState, token: &BearerToken, scope: &'static str) -> ApiResult<Principal> {
    Guard::login_required(&[scope])
        .authenticate(state, token)
        .await?
        .authorize(state)
}

// ============================================================================
// Registration and profiles
// ============================================================================

#[derive(Debug, Deserialize)]
struct Registration {
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    middle_name: Option<String>,
    last_name: Option<String>,
    organization: Option<String>,
    github: Option<String>,
    country: Option<String>,
    bio: Option<String>,
}

async fn list_users(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    Guard::login_required(&[READ])
        .permission(Permission::Role(StaticRole::Admin))
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;

    let users = state
        .db
        .read(move |conn| Ok(store::list::<User>(conn, page)?))
        .await?;
    respond(&USER_SCHEMA, &users)
}

/// Public sign-up. New accounts are active regular users.
async fn create_user(
    State(state): State<AppState>,
    Payload(form): Payload<Registration>,
) -> ApiResult<Json<Value>> {
    let mut validator = FieldValidator::new();
    required(&mut validator, "username", form.username.as_deref(), validate_username);
    required(&mut validator, "password", form.password.as_deref(), validate_password);
    required(&mut validator, "email", form.email.as_deref(), validate_email);
    validator.finish()?;

    let password = form.password.unwrap_or_default();
    let new_user = NewUser {
        username: form.username.unwrap_or_default(),
        email: form.email.unwrap_or_default(),
        password_hash: hash_password(password, state.config.bcrypt_cost).await?,
        first_name: form.first_name.unwrap_or_default(),
        middle_name: form.middle_name.unwrap_or_default(),
        last_name: form.last_name.unwrap_or_default(),
        organization: form.organization,
        github: form.github,
        country: form.country,
        bio: form.bio,
        static_roles: StaticRoles::new_account(),
    };

    let user = state
        .db
        .commit_or_abort("Failed to create a new user", move |conn| {
            Ok(store::users::insert(conn, &new_user)?)
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "User registered");
    crate::record_operation("create_user", "success");
    respond(&USER_SCHEMA, &user)
}

async fn signup_form(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "recaptcha_server_key": state.config.recaptcha_public_key }))
}

async fn me(State(state): State<AppState>, token: BearerToken) -> ApiResult<Json<Value>> {
    let principal = current_user(&state, &token, READ).await?;
    respond(&USER_SCHEMA, &principal.user)
}

async fn get_user(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .permission(Permission::Owner)
        .authenticate(&state, &token)
        .await?
        .resolve::<User>(&state, "user_id", &mut params)
        .await?
        .authorize(&state)?;
    respond(&USER_SCHEMA, &target)
}

/// Patch a profile. Role fields need an administrator; a new password is
/// hashed before it is stored.
async fn patch_user(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<User>(&state, "user_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let mut ops = patch_operations(&USER_PATCH, &body)?;
    let password_ops = take_operations(&mut ops, "password");

    let touches_roles = ops
        .iter()
        .filter_map(|op| op.field())
        .any(|field| ROLE_PATCH_FIELDS.contains(&field));
    if touches_roles {
        let admin = Permission::Role(StaticRole::Admin);
        if !admin.check(&principal.user, None, state.write_policy.as_ref()) {
            return Err(ApiError::Forbidden(admin.description().to_string()));
        }
    }

    let patched = USER_PATCH.apply(&target, &ops)?;

    let mut validator = FieldValidator::new();
    if patched.email != target.email {
        validator.check("email", validate_email(&patched.email));
    }
    let password = match password_ops.last() {
        None => None,
        Some(op) => match op.value.as_str() {
            Some(password) => {
                validator.check("password", validate_password(password));
                Some(password.to_string())
            }
            None => {
                validator.add("password", "Not a valid string.");
                None
            }
        },
    };
    validator.finish()?;

    let password_hash = match password {
        Some(password) => Some(hash_password(password, state.config.bcrypt_cost).await?),
        None => None,
    };

    let user_id = target.id;
    let updated = state
        .db
        .commit_or_abort("Failed to update user details", move |conn| {
            if let Some(hash) = password_hash {
                store::users::set_password(conn, user_id, &hash)?;
            }
            Ok(store::users::update(conn, &patched)?)
        })
        .await?;

    info!(user_id, by = principal.user.id, "User updated");
    crate::record_operation("update_user", "success");
    respond(&USER_SCHEMA, &updated)
}

// ============================================================================
// Follows
// ============================================================================

async fn followers(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let uid = current_user(&state, &token, READ).await?.user.id;
    let Pagination(page) = page?;
    let users = state
        .db
        .read(move |conn| Ok(store::users::followers(conn, uid, page)?))
        .await?;
    respond(&USER_SCHEMA, &users)
}

async fn following(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let uid = current_user(&state, &token, READ).await?.user.id;
    let Pagination(page) = page?;
    let users = state
        .db
        .read(move |conn| Ok(store::users::following(conn, uid, page)?))
        .await?;
    respond(&USER_SCHEMA, &users)
}

async fn follow(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<User>(&state, "user_id", &mut params)
        .await?
        .authorize(&state)?;

    let (uid, me) = (target.id, principal.user.id);
    if uid == me {
        return Err(ApiError::BadRequest("You cannot follow yourself".to_string()));
    }

    let user = state
        .db
        .commit_or_abort("Failed to update following relationships", move |conn| {
            store::users::follow(conn, uid, me)?;
            Ok(store::users::get_by_id(conn, me)?)
        })
        .await?;

    info!(user_id = me, follows = uid, "User followed");
    respond(&USER_SCHEMA, &user)
}

async fn unfollow(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<User>(&state, "user_id", &mut params)
        .await?
        .authorize(&state)?;

    let (uid, me) = (target.id, principal.user.id);
    let user = state
        .db
        .commit_or_abort("Failed to update following relationships", move |conn| {
            if !store::users::unfollow(conn, uid, me)? {
                return Err(ApiError::Conflict(
                    "You are not following this user".to_string(),
                ));
            }
            Ok(store::users::get_by_id(conn, me)?)
        })
        .await?;

    info!(user_id = me, unfollows = uid, "User unfollowed");
    respond(&USER_SCHEMA, &user)
}

// ============================================================================
// Contributions of the current user
// ============================================================================

async fn contributed<E: Entity>(
    state: &AppState,
    token: &BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Vec<E>> {
    let uid = current_user(state, token, READ).await?.user.id;
    let Pagination(page) = page?;
    state
        .db
        .read(move |conn| Ok(store::list_by_owner::<E>(conn, uid, page)?))
        .await
}

async fn my_comments(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    respond(&COMMENT_SCHEMA, &contributed::<Comment>(&state, &token, page).await?)
}

async fn my_references(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    respond(&REFERENCE_SCHEMA, &contributed::<Reference>(&state, &token, page).await?)
}

async fn my_sources(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    respond(&SOURCE_SCHEMA, &contributed::<Source>(&state, &token, page).await?)
}

async fn my_licenses(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    respond(&LICENSE_SCHEMA, &contributed::<License>(&state, &token, page).await?)
}

async fn my_organizations(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    respond(&ORGANIZATION_SCHEMA, &contributed::<Organization>(&state, &token, page).await?)
}

async fn my_publishers(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    respond(&PUBLISHER_SCHEMA, &contributed::<Publisher>(&state, &token, page).await?)
}

async fn my_datasets(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let uid = current_user(&state, &token, READ).await?.user.id;
    let Pagination(page) = page?;
    let views = state
        .db
        .read(move |conn| {
            let datasets = store::list_by_owner::<Dataset>(conn, uid, page)?;
            Ok(store::datasets::views(conn, datasets)?)
        })
        .await?;
    respond(&prism_catalog_core::datasets::DATASET_SCHEMA, &views)
}

async fn my_stories(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let uid = current_user(&state, &token, READ).await?.user.id;
    let Pagination(page) = page?;
    let views = state
        .db
        .read(move |conn| {
            let stories = store::list_by_owner::<Story>(conn, uid, page)?;
            Ok(store::stories::views(conn, stories)?)
        })
        .await?;
    respond(&prism_catalog_core::stories::STORY_SCHEMA, &views)
}
