//! Comments
//!
//! Comments are created through the dataset and story resources, which
//! call [`create_on`] and [`list_on`]; this module serves the comments
//! themselves.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use prism_catalog_core::comments::{COMMENT_PATCH, COMMENT_SCHEMA};
use prism_catalog_core::validation::{validate_comment, FieldValidator};
use prism_catalog_core::{new_id, Comment, CommentTarget};
use serde_json::Value;
use tracing::info;

use super::{patch_operations, required, respond};
use crate::error::{ApiError, ApiResult};
use crate::extract::{BearerToken, Payload};
use crate::pipeline::{Authorized, Guard, Permission};
use crate::store::{self, Page};
use crate::AppState;

pub const READ: &str = "comments:read";
pub const WRITE: &str = "comments:write";

pub const SCOPES: &[(&str, &str)] = &[
    (READ, "Read comments"),
    (WRITE, "Edit and delete your comments"),
];

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/api/v1/comments/:comment_id",
        get(get_comment).patch(patch_comment).delete(delete_comment),
    )
}

/// Comments on one dataset or story.
pub(crate) async fn list_on(
    state: &AppState,
    target: CommentTarget,
    target_id: String,
    page: Page,
) -> ApiResult<Json<Value>> {
    let comments = state
        .db
        .read(move |conn| Ok(store::comments::on_target(conn, target, &target_id, page)?))
        .await?;
    respond(&COMMENT_SCHEMA, &comments)
}

/// Attach a comment by `user_id` to a dataset or story.
pub(crate) async fn create_on(
    state: &AppState,
    user_id: i64,
    target: CommentTarget,
    target_id: String,
    body: &Value,
) -> ApiResult<Json<Value>> {
    let fields = COMMENT_SCHEMA.load(body)?;
    let text = fields.get("comment").and_then(Value::as_str);

    let mut validator = FieldValidator::new();
    required(&mut validator, "comment", text, validate_comment);
    validator.finish()?;

    let comment = Comment {
        id: new_id(),
        comment: text.unwrap_or_default().to_string(),
        target_id,
        target_type: target.as_i64(),
        user_id: Some(user_id),
        stars: 0,
        created: String::new(),
        updated: String::new(),
    };

    let comment = state
        .db
        .commit_or_abort("Failed to create a new comment", move |conn| {
            Ok(store::comments::insert(conn, &comment)?)
        })
        .await?;

    info!(user_id, comment_id = %comment.id, target_id = %comment.target_id, "Comment created");
    crate::record_operation("create_comment", "success");
    respond(&COMMENT_SCHEMA, &comment)
}

async fn get_comment(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Comment>(&state, "comment_id", &mut params)
        .await?
        .authorize(&state)?;
    respond(&COMMENT_SCHEMA, &target)
}

async fn patch_comment(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .authenticate(&state, &token)
        .await?
        .resolve::<Comment>(&state, "comment_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let ops = patch_operations(&COMMENT_PATCH, &body)?;
    let patched = COMMENT_PATCH.apply(&target, &ops)?;

    let mut validator = FieldValidator::new();
    validator.check("comment", validate_comment(&patched.comment));
    validator.finish()?;

    let updated = state
        .db
        .commit_or_abort("Failed to update comment details", move |conn| {
            Ok(store::comments::update(conn, &patched)?)
        })
        .await?;
    respond(&COMMENT_SCHEMA, &updated)
}

async fn delete_comment(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<Comment>(&state, "comment_id", &mut params)
        .await?
        .authorize(&state)?;

    let id = target.id;
    state
        .db
        .commit_or_abort("Failed to delete the comment", move |conn| {
            store::delete::<Comment>(conn, &id)?;
            Ok(())
        })
        .await?;

    info!(user_id = principal.user.id, "Comment deleted");
    crate::record_operation("delete_comment", "success");
    Ok(StatusCode::NO_CONTENT)
}
