//! Stories
//!
//! Stories are created from a dataset (`POST /datasets/{id}/stories`), which
//! uses [`new_story`]; everything else lives here.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use prism_catalog_core::stories::{
    StoryDetails, StoryType, STORY_PATCH, STORY_SCHEMA, STORY_STAT_SCHEMA,
};
use prism_catalog_core::validation::{validate_title, FieldValidator};
use prism_catalog_core::{new_id, CommentTarget, Story};
use serde_json::{json, Value};
use tracing::info;

use super::{build_entity, collection, comments, patch_operations, required, respond};
use crate::error::{ApiError, ApiResult};
use crate::extract::{BearerToken, Pagination, Payload};
use crate::pipeline::{Authorized, Guard, Permission};
use crate::store;
use crate::AppState;

pub const READ: &str = "stories:read";
pub const WRITE: &str = "stories:write";

pub const SCOPES: &[(&str, &str)] = &[
    (READ, "Read stories"),
    (WRITE, "Create, edit and star stories"),
];

const BASE: &str = "/api/v1/stories";

pub fn routes() -> Router<AppState> {
    collection(Router::new(), BASE, get(list_stories))
        .route(
            "/api/v1/stories/:story_id",
            get(get_story).patch(patch_story).delete(delete_story),
        )
        .route("/api/v1/stories/:story_id/stat", get(story_stat))
        .route(
            "/api/v1/stories/:story_id/stars",
            patch(star_story).delete(unstar_story),
        )
        .route(
            "/api/v1/stories/:story_id/comments",
            get(list_comments).post(add_comment),
        )
}

/// Build a story from a client payload. `type` defaults to a general story
/// and `details` must match it.
pub(crate) fn new_story(body: &Value, contributor_id: i64) -> ApiResult<Story> {
    let mut fields = STORY_SCHEMA.load(body)?;

    let mut validator = FieldValidator::new();
    required(
        &mut validator,
        "title",
        fields.get("title").and_then(Value::as_str),
        validate_title,
    );
    let story_type = match fields.get("type") {
        None | Some(Value::Null) => StoryType::General.as_i64(),
        Some(value) => value.as_i64().unwrap_or_else(|| {
            validator.add("type", "Not a valid integer.");
            StoryType::General.as_i64()
        }),
    };
    validator.finish()?;

    let details = StoryDetails::from_payload(story_type, fields.remove("details").as_ref())?;

    let mut story: Story = build_entity(
        fields,
        json!({
            "id": new_id(),
            "type": story_type,
            "stars": 0,
            "details": null,
            "contributor_id": contributor_id,
            "created": "",
            "updated": "",
        }),
    )?;
    story.details = details;
    Ok(story)
}

async fn list_stories(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;

    let views = state
        .db
        .read(move |conn| {
            let stories = store::list::<Story>(conn, page)?;
            Ok(store::stories::views(conn, stories)?)
        })
        .await?;
    respond(&STORY_SCHEMA, &views)
}

async fn get_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;

    let view = state
        .db
        .read(move |conn| Ok(store::stories::view(conn, target)?))
        .await?;
    respond(&STORY_SCHEMA, &view)
}

async fn story_stat(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;

    let view = state
        .db
        .read(move |conn| Ok(store::stories::view(conn, target)?))
        .await?;
    respond(&STORY_STAT_SCHEMA, &view)
}

async fn patch_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let ops = patch_operations(&STORY_PATCH, &body)?;
    for op in ops.iter().filter(|op| op.field() == Some("details")) {
        StoryDetails::from_payload(target.story_type, Some(&op.value))?;
    }
    let patched = STORY_PATCH.apply(&target, &ops)?;
    if patched.title != target.title {
        let mut validator = FieldValidator::new();
        validator.check("title", validate_title(&patched.title));
        validator.finish()?;
    }

    let view = state
        .db
        .commit_or_abort("Failed to update story details", move |conn| {
            let story = store::stories::update(conn, &patched)?;
            Ok(store::stories::view(conn, story)?)
        })
        .await?;
    respond(&STORY_SCHEMA, &view)
}

async fn delete_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;

    let id = target.id;
    let story_id = id.clone();
    state
        .db
        .commit_or_abort("Failed to delete the story", move |conn| {
            store::delete::<Story>(conn, &id)?;
            Ok(())
        })
        .await?;

    info!(user_id = principal.user.id, story_id = %story_id, "Story deleted");
    crate::record_operation("delete_story", "success");
    Ok(StatusCode::NO_CONTENT)
}

async fn star_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;

    let uid = principal.user.id;
    let story = state
        .db
        .commit_or_abort("Failed to star a story", move |conn| {
            store::stories::add_star(conn, uid, &target.id)?;
            Ok(store::get::<Story>(conn, &target.id)?)
        })
        .await?;
    Ok(Json(json!({ "id": story.id, "stars": story.stars })))
}

/// Remove the caller's star. Unstarring a story that was never starred
/// changes nothing.
async fn unstar_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;

    let uid = principal.user.id;
    let story = state
        .db
        .commit_or_abort("Failed to unstar a story", move |conn| {
            store::stories::remove_star(conn, uid, &target.id)?;
            Ok(store::get::<Story>(conn, &target.id)?)
        })
        .await?;
    Ok(Json(json!({ "id": story.id, "stars": story.stars })))
}

async fn list_comments(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;
    comments::list_on(&state, CommentTarget::Story, target.id, page).await
}

async fn add_comment(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Story>(&state, "story_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;
    comments::create_on(&state, principal.user.id, CommentTarget::Story, target.id, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_story_drops_protected_fields() {
        let story = new_story(
            &json!({
                "title": "Rising water",
                "type": 2,
                "stars": 500,
                "id": "forged",
                "details": {"title": "Floods", "location": "Delta"},
            }),
            7,
        )
        .unwrap();
        assert_eq!(story.stars, 0);
        assert_ne!(story.id, "forged");
        assert_eq!(story.contributor_id, Some(7));
        assert_eq!(story.details.unwrap().story_type(), StoryType::News);
    }

    #[test]
    fn test_new_story_defaults_to_general() {
        let story = new_story(&json!({"title": "Plain"}), 1).unwrap();
        assert_eq!(story.story_type, 0);
        assert!(story.details.is_none());
    }

    #[test]
    fn test_new_story_validation() {
        assert!(new_story(&json!({"type": 0}), 1).is_err());
        assert!(new_story(&json!({"title": "x", "type": 9}), 1).is_err());
        assert!(new_story(&json!({"title": "x", "type": 1}), 1).is_err());
        assert!(new_story(&json!({"title": "x", "type": "news"}), 1).is_err());
    }
}
