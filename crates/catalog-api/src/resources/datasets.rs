//! Datasets
//!
//! A dataset owns its sources, references, stars and comments. Licenses,
//! organizations and publishers are shared and resolved by name when a
//! dataset is registered.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use prism_catalog_core::datasets::{
    Dataset, Reference, Source, DATASET_PATCH, DATASET_SCHEMA, REFERENCE_SCHEMA, SOURCE_SCHEMA,
};
use prism_catalog_core::stories::STORY_SCHEMA;
use prism_catalog_core::validation::{validate_dataset_name, validate_title, FieldValidator};
use prism_catalog_core::{new_id, CommentTarget, Story};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    build_entity, collection, comments, patch_operations, required, respond, stories, string_field,
};
use crate::error::{ApiError, ApiResult};
use crate::extract::{BearerToken, Pagination, Payload};
use crate::pipeline::{Authorized, Guard, Permission};
use crate::store;
use crate::AppState;

pub const READ: &str = "datasets:read";
pub const WRITE: &str = "datasets:write";

pub const SCOPES: &[(&str, &str)] = &[
    (READ, "Read datasets and their provenance"),
    (WRITE, "Register, edit and star datasets"),
];

const BASE: &str = "/api/v1/datasets";

pub fn routes() -> Router<AppState> {
    collection(Router::new(), BASE, get(list_datasets).post(create_dataset))
        .route(
            "/api/v1/datasets/:dataset_id",
            get(get_dataset).patch(patch_dataset).delete(delete_dataset),
        )
        .route(
            "/api/v1/datasets/:dataset_id/references",
            get(list_references).post(add_reference),
        )
        .route(
            "/api/v1/datasets/:dataset_id/sources",
            get(list_sources).post(add_source),
        )
        .route(
            "/api/v1/datasets/:dataset_id/stars",
            patch(star_dataset).delete(unstar_dataset),
        )
        .route(
            "/api/v1/datasets/:dataset_id/comments",
            get(list_comments).post(add_comment),
        )
        .route(
            "/api/v1/datasets/:dataset_id/stories",
            get(list_stories).post(add_story),
        )
        .route(
            "/api/v1/datasets/:dataset_id/stories/:story_id/links",
            patch(link_story).delete(unlink_story),
        )
}

// ============================================================================
// Registration
// ============================================================================

/// Names of the shared records a new dataset refers to.
#[derive(Debug, Clone, PartialEq)]
struct Provenance {
    license: String,
    organization: Option<String>,
    publisher: Option<String>,
}

/// Validate a registration payload into an unsaved dataset. Foreign keys
/// are filled in later from [`Provenance`].
fn new_dataset(body: &Value, contributor_id: i64) -> ApiResult<(Dataset, Provenance)> {
    let mut fields = DATASET_SCHEMA.load(body)?;
    let raw = body.as_object().cloned().unwrap_or_default();
    let license = string_field(&raw, "license_name");

    let mut validator = FieldValidator::new();
    required(
        &mut validator,
        "name",
        fields.get("name").and_then(Value::as_str),
        validate_dataset_name,
    );
    required(
        &mut validator,
        "title",
        fields.get("title").and_then(Value::as_str),
        validate_title,
    );
    validator.require("license_name", license.as_deref());
    validator.finish()?;

    if fields.get("data_quality").map_or(true, Value::is_null) {
        fields.insert("data_quality".to_string(), Value::Bool(false));
    }

    let dataset = build_entity(
        fields,
        json!({
            "id": new_id(),
            "stars": 0,
            "license_id": null,
            "organization_id": null,
            "publisher_id": null,
            "contributor_id": contributor_id,
            "created": "",
            "updated": "",
            "deleted": false,
        }),
    )?;

    let provenance = Provenance {
        license: license.unwrap_or_default(),
        organization: string_field(&raw, "organization_name"),
        publisher: string_field(&raw, "publisher_name"),
    };
    Ok((dataset, provenance))
}

async fn list_datasets(
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
            let datasets = store::list::<Dataset>(conn, page)?;
            Ok(store::datasets::views(conn, datasets)?)
        })
        .await?;
    respond(&DATASET_SCHEMA, &views)
}

/// Register a dataset. Unknown licenses, organizations and publishers are
/// created in the same transaction.
async fn create_dataset(
    State(state): State<AppState>,
    token: BearerToken,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let principal = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let uid = principal.user.id;
    let (mut dataset, provenance) = new_dataset(&body, uid)?;

    let view = state
        .db
        .commit_or_abort("Failed to create a new dataset", move |conn| {
            dataset.license_id =
                Some(store::provenance::license_by_title(conn, &provenance.license, uid)?.id);
            if let Some(name) = provenance.organization.as_deref() {
                dataset.organization_id =
                    Some(store::provenance::organization_by_name(conn, name, uid)?.id);
            }
            if let Some(name) = provenance.publisher.as_deref() {
                dataset.publisher_id =
                    Some(store::provenance::publisher_by_name(conn, name, uid)?.id);
            }
            let dataset = store::datasets::insert(conn, &dataset)?;
            Ok(store::datasets::view(conn, dataset)?)
        })
        .await?;

    info!(user_id = uid, dataset_id = %view.dataset.id, name = %view.dataset.name, "Dataset created");
    crate::record_operation("create_dataset", "success");
    respond(&DATASET_SCHEMA, &view)
}

// ============================================================================
// Single dataset
// ============================================================================

async fn get_dataset(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let view = state
        .db
        .read(move |conn| Ok(store::datasets::view(conn, target)?))
        .await?;
    respond(&DATASET_SCHEMA, &view)
}

async fn patch_dataset(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let ops = patch_operations(&DATASET_PATCH, &body)?;
    let patched = DATASET_PATCH.apply(&target, &ops)?;

    let mut validator = FieldValidator::new();
    if patched.name != target.name {
        validator.check("name", validate_dataset_name(&patched.name));
    }
    if patched.title != target.title {
        validator.check("title", validate_title(&patched.title));
    }
    validator.finish()?;

    let view = state
        .db
        .commit_or_abort("Failed to patch a dataset", move |conn| {
            let dataset = store::datasets::update(conn, &patched)?;
            Ok(store::datasets::view(conn, dataset)?)
        })
        .await?;
    respond(&DATASET_SCHEMA, &view)
}

/// Soft delete. The dataset disappears from every lookup but its rows stay.
async fn delete_dataset(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let id = target.id.clone();
    state
        .db
        .commit_or_abort("Failed to delete a dataset", move |conn| {
            Ok(store::datasets::soft_delete(conn, &id)?)
        })
        .await?;

    info!(user_id = principal.user.id, dataset_id = %target.id, "Dataset deleted");
    crate::record_operation("delete_dataset", "success");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// References and sources
// ============================================================================

async fn list_references(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;

    let references = state
        .db
        .read(move |conn| Ok(store::provenance::references_of(conn, &target.id, page)?))
        .await?;
    respond(&REFERENCE_SCHEMA, &references)
}

async fn add_reference(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let fields = REFERENCE_SCHEMA.load(&body)?;
    let mut validator = FieldValidator::new();
    required(
        &mut validator,
        "title",
        fields.get("title").and_then(Value::as_str),
        validate_title,
    );
    validator.require("reference", fields.get("reference").and_then(Value::as_str));
    validator.finish()?;

    let reference: Reference = build_entity(
        fields,
        json!({
            "id": new_id(),
            "dataset_id": target.id,
            "contributor_id": principal.user.id,
            "created": "",
            "updated": "",
        }),
    )?;

    let reference = state
        .db
        .commit_or_abort("Failed to create a new reference", move |conn| {
            Ok(store::provenance::insert_reference(conn, &reference)?)
        })
        .await?;
    respond(&REFERENCE_SCHEMA, &reference)
}

async fn list_sources(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;

    let sources = state
        .db
        .read(move |conn| Ok(store::provenance::sources_of(conn, &target.id, page)?))
        .await?;
    respond(&SOURCE_SCHEMA, &sources)
}

async fn add_source(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let mut fields = SOURCE_SCHEMA.load(&body)?;
    let mut validator = FieldValidator::new();
    required(
        &mut validator,
        "title",
        fields.get("title").and_then(Value::as_str),
        validate_title,
    );
    validator.require("access_url", fields.get("access_url").and_then(Value::as_str));
    validator.require("format", fields.get("format").and_then(Value::as_str));
    validator.finish()?;

    if fields.get("media_type").map_or(true, Value::is_null) {
        fields.insert("media_type".to_string(), Value::String(String::new()));
    }

    let mut source: Source = build_entity(
        fields,
        json!({
            "id": new_id(),
            "dataset_id": target.id,
            "snapshot": null,
            "contributor_id": principal.user.id,
            "created": "",
            "updated": "",
        }),
    )?;
    source.normalize_download_url();

    let source = state
        .db
        .commit_or_abort("Failed to create a new data source", move |conn| {
            Ok(store::provenance::insert_source(conn, &source)?)
        })
        .await?;
    respond(&SOURCE_SCHEMA, &source)
}

// ============================================================================
// Stars and comments
// ============================================================================

async fn star_dataset(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let uid = principal.user.id;
    let dataset = state
        .db
        .commit_or_abort("Failed to star a dataset", move |conn| {
            store::datasets::add_star(conn, uid, &target.id)?;
            Ok(store::get::<Dataset>(conn, &target.id)?)
        })
        .await?;
    Ok(Json(json!({ "id": dataset.id, "stars": dataset.stars })))
}

/// Unstarring a dataset the caller never starred is a no-op.
async fn unstar_dataset(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let uid = principal.user.id;
    let dataset = state
        .db
        .commit_or_abort("Failed to unstar a dataset", move |conn| {
            store::datasets::remove_star(conn, uid, &target.id)?;
            Ok(store::get::<Dataset>(conn, &target.id)?)
        })
        .await?;
    Ok(Json(json!({ "id": dataset.id, "stars": dataset.stars })))
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
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;
    comments::list_on(&state, CommentTarget::Dataset, target.id, page).await
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
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;
    comments::create_on(
        &state,
        principal.user.id,
        CommentTarget::Dataset,
        target.id,
        &body,
    )
    .await
}

// ============================================================================
// Stories about a dataset
// ============================================================================

async fn list_stories(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[stories::READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let views = state
        .db
        .read(move |conn| {
            let linked = store::stories::linked_to(conn, &target.id)?;
            Ok(store::stories::views(conn, linked)?)
        })
        .await?;
    respond(&STORY_SCHEMA, &views)
}

/// Write a story and link it to the dataset in one transaction.
async fn add_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { principal, target } = Guard::login_required(&[stories::WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let uid = principal.user.id;
    let story = stories::new_story(&body, uid)?;

    let view = state
        .db
        .commit_or_abort("Failed to create a new data story", move |conn| {
            let story = store::stories::insert(conn, &story)?;
            store::datasets::link_story(conn, &target.id, &story.id, uid)?;
            Ok(store::stories::view(conn, story)?)
        })
        .await?;

    info!(user_id = uid, story_id = %view.story.id, "Story created");
    crate::record_operation("create_story", "success");
    respond(&STORY_SCHEMA, &view)
}

fn story_id_param(params: &mut HashMap<String, String>) -> ApiResult<String> {
    params
        .remove("story_id")
        .ok_or_else(|| ApiError::BadRequest("Missing path parameter \"story_id\"".to_string()))
}

async fn link_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let story_id = story_id_param(&mut params)?;
    let Authorized { principal, target } = Guard::login_required(&[stories::WRITE])
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let uid = principal.user.id;
    let (id, count) = state
        .db
        .commit_or_abort("Failed to link a story and dataset", move |conn| {
            let story = store::get::<Story>(conn, &story_id)?;
            store::datasets::link_story(conn, &target.id, &story.id, uid)?;
            let count = store::datasets::story_ids(conn, &target.id)?.len();
            Ok((target.id, count))
        })
        .await?;
    Ok(Json(json!({ "id": id, "story_count": count })))
}

/// Remove the caller's own link. Links made by someone else, or no link at
/// all, are a conflict.
async fn unlink_story(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let story_id = story_id_param(&mut params)?;
    let Authorized { principal, target } = Guard::login_required(&[stories::WRITE])
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<Dataset>(&state, "dataset_id", &mut params)
        .await?
        .authorize(&state)?;

    let uid = principal.user.id;
    let (id, count) = state
        .db
        .commit_or_abort("Failed to unlink a story and dataset", move |conn| {
            let story = store::get::<Story>(conn, &story_id)?;
            if !store::datasets::unlink_story(conn, &target.id, &story.id, uid)? {
                warn!(user_id = uid, dataset_id = %target.id, story_id = %story.id, "No link to remove");
                return Err(ApiError::Conflict("Unlinked already".to_string()));
            }
            let count = store::datasets::story_ids(conn, &target.id)?.len();
            Ok((target.id, count))
        })
        .await?;
    Ok(Json(json!({ "id": id, "story_count": count })))
}
