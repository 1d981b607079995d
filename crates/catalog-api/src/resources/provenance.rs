//! Licenses, organizations, publishers, sources and references
//!
//! All five share one set of generic handlers, parameterized by
//! [`Record`]. Licenses, organizations and publishers can also be created
//! directly; sources and references are created through their dataset.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use prism_catalog_core::datasets::{
    License, Organization, Publisher, Reference, Source, LICENSE_PATCH, LICENSE_SCHEMA,
    ORGANIZATION_PATCH, ORGANIZATION_SCHEMA, PUBLISHER_PATCH, PUBLISHER_SCHEMA, REFERENCE_PATCH,
    REFERENCE_SCHEMA, SOURCE_PATCH, SOURCE_SCHEMA,
};
use prism_catalog_core::patch::PatchSpec;
use prism_catalog_core::schema::Schema;
use prism_catalog_core::validation::{validate_title, FieldValidator};
use prism_catalog_core::{new_id, Owned};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::datasets::{READ, WRITE};
use super::{build_entity, collection, patch_operations, required, respond};
use crate::error::{ApiError, ApiResult};
use crate::extract::{BearerToken, Pagination, Payload};
use crate::pipeline::{Authorized, Guard, Permission};
use crate::store::{self, provenance, Entity};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    let router = Router::new();
    let router = mount::<License>(router, get(list_all::<License>).post(create_one::<License>));
    let router = mount::<Organization>(
        router,
        get(list_all::<Organization>).post(create_one::<Organization>),
    );
    let router = mount::<Publisher>(
        router,
        get(list_all::<Publisher>).post(create_one::<Publisher>),
    );
    let router = mount::<Source>(router, get(list_all::<Source>));
    mount::<Reference>(router, get(list_all::<Reference>))
}

fn mount<T: Record>(
    router: Router<AppState>,
    listing: MethodRouter<AppState>,
) -> Router<AppState> {
    collection(router, T::PATH, listing).route(
        &format!("{}/:{}", T::PATH, T::KEY),
        get(get_one::<T>).patch(patch_one::<T>).delete(delete_one::<T>),
    )
}

// ============================================================================
// Record types
// ============================================================================

/// A provenance row served under its own collection.
pub(crate) trait Record:
    Entity + Owned + Clone + Serialize + DeserializeOwned + Sync
{
    const PATH: &'static str;
    /// Path parameter naming the row
    const KEY: &'static str;
    const PATCH: PatchSpec;
    /// Field that must stay a valid, non-empty title
    const LABEL_FIELD: &'static str;
    const UPDATE_FAILED: &'static str;
    const DELETE_FAILED: &'static str;

    fn schema() -> &'static Schema;
    fn key(&self) -> String;
    fn label(&self) -> &str;
    fn update(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self>;

    /// Fill in derived fields before writing.
    fn normalize(&mut self) {}
}

/// A record that can be created on its own.
pub(crate) trait Creatable: Record {
    const CREATE_FAILED: &'static str;

    /// Values the server assigns regardless of the payload.
    fn assigned(contributor_id: i64) -> Value {
        json!({
            "id": 0,
            "contributor_id": contributor_id,
            "created": "",
            "updated": "",
        })
    }

    fn insert(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self>;
}

impl Record for License {
    const PATH: &'static str = "/api/v1/licenses";
    const KEY: &'static str = "license_id";
    const PATCH: PatchSpec = LICENSE_PATCH;
    const LABEL_FIELD: &'static str = "title";
    const UPDATE_FAILED: &'static str = "Failed to patch a license";
    const DELETE_FAILED: &'static str = "Failed to delete a license";

    fn schema() -> &'static Schema {
        &LICENSE_SCHEMA
    }

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn update(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::update_license(conn, record)
    }
}

impl Creatable for License {
    const CREATE_FAILED: &'static str = "Failed to create a new license";

    fn insert(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::insert_license(conn, record)
    }
}

impl Record for Organization {
    const PATH: &'static str = "/api/v1/organizations";
    const KEY: &'static str = "organization_id";
    const PATCH: PatchSpec = ORGANIZATION_PATCH;
    const LABEL_FIELD: &'static str = "name";
    const UPDATE_FAILED: &'static str = "Failed to patch an organization";
    const DELETE_FAILED: &'static str = "Failed to delete an organization";

    fn schema() -> &'static Schema {
        &ORGANIZATION_SCHEMA
    }

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn update(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::update_organization(conn, record)
    }
}

impl Creatable for Organization {
    const CREATE_FAILED: &'static str = "Failed to create a new organization";

    fn insert(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::insert_organization(conn, record)
    }
}

impl Record for Publisher {
    const PATH: &'static str = "/api/v1/publishers";
    const KEY: &'static str = "publisher_id";
    const PATCH: PatchSpec = PUBLISHER_PATCH;
    const LABEL_FIELD: &'static str = "name";
    const UPDATE_FAILED: &'static str = "Failed to patch a publisher";
    const DELETE_FAILED: &'static str = "Failed to delete a publisher";

    fn schema() -> &'static Schema {
        &PUBLISHER_SCHEMA
    }

    fn key(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn update(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::update_publisher(conn, record)
    }
}

impl Creatable for Publisher {
    const CREATE_FAILED: &'static str = "Failed to create a new publisher";

    fn assigned(contributor_id: i64) -> Value {
        json!({
            "id": new_id(),
            "contributor_id": contributor_id,
            "created": "",
            "updated": "",
        })
    }

    fn insert(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::insert_publisher(conn, record)
    }
}

impl Record for Source {
    const PATH: &'static str = "/api/v1/sources";
    const KEY: &'static str = "source_id";
    const PATCH: PatchSpec = SOURCE_PATCH;
    const LABEL_FIELD: &'static str = "title";
    const UPDATE_FAILED: &'static str = "Failed to patch a data source";
    const DELETE_FAILED: &'static str = "Failed to delete a data source";

    fn schema() -> &'static Schema {
        &SOURCE_SCHEMA
    }

    fn key(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn update(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::update_source(conn, record)
    }

    fn normalize(&mut self) {
        self.normalize_download_url();
    }
}

impl Record for Reference {
    const PATH: &'static str = "/api/v1/references";
    const KEY: &'static str = "reference_id";
    const PATCH: PatchSpec = REFERENCE_PATCH;
    const LABEL_FIELD: &'static str = "title";
    const UPDATE_FAILED: &'static str = "Failed to patch a reference";
    const DELETE_FAILED: &'static str = "Failed to delete a reference";

    fn schema() -> &'static Schema {
        &REFERENCE_SCHEMA
    }

    fn key(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn update(conn: &Connection, record: &Self) -> prism_catalog_core::Result<Self> {
        provenance::update_reference(conn, record)
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_all<T: Record>(
    State(state): State<AppState>,
    token: BearerToken,
    page: Result<Pagination, ApiError>,
) -> ApiResult<Json<Value>> {
    Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Pagination(page) = page?;

    let records = state
        .db
        .read(move |conn| Ok(store::list::<T>(conn, page)?))
        .await?;
    respond(T::schema(), &records)
}

async fn create_one<T: Creatable>(
    State(state): State<AppState>,
    token: BearerToken,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let principal = Guard::login_required(&[WRITE])
        .authenticate(&state, &token)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let fields = T::schema().load(&body)?;
    let mut validator = FieldValidator::new();
    required(
        &mut validator,
        T::LABEL_FIELD,
        fields.get(T::LABEL_FIELD).and_then(Value::as_str),
        validate_title,
    );
    validator.finish()?;

    let mut record: T = build_entity(fields, T::assigned(principal.user.id))?;
    record.normalize();

    let record = state
        .db
        .commit_or_abort(T::CREATE_FAILED, move |conn| Ok(T::insert(conn, &record)?))
        .await?;

    info!(user_id = principal.user.id, kind = T::KIND, "Record created");
    respond(T::schema(), &record)
}

async fn get_one<T: Record>(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[READ])
        .authenticate(&state, &token)
        .await?
        .resolve::<T>(&state, T::KEY, &mut params)
        .await?
        .authorize(&state)?;
    respond(T::schema(), &target)
}

async fn patch_one<T: Record>(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
    body: Result<Payload, ApiError>,
) -> ApiResult<Json<Value>> {
    let Authorized { target, .. } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .authenticate(&state, &token)
        .await?
        .resolve::<T>(&state, T::KEY, &mut params)
        .await?
        .authorize(&state)?;
    let Payload(body) = body?;

    let ops = patch_operations(&T::PATCH, &body)?;
    let mut patched = T::PATCH.apply(&target, &ops)?;
    if patched.label() != target.label() {
        let mut validator = FieldValidator::new();
        validator.check(T::LABEL_FIELD, validate_title(patched.label()));
        validator.finish()?;
    }
    patched.normalize();

    let record = state
        .db
        .commit_or_abort(T::UPDATE_FAILED, move |conn| Ok(T::update(conn, &patched)?))
        .await?;
    respond(T::schema(), &record)
}

/// Hard delete. A row still referenced by a dataset is a conflict.
async fn delete_one<T: Record>(
    State(state): State<AppState>,
    token: BearerToken,
    Path(mut params): Path<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let Authorized { principal, target } = Guard::login_required(&[WRITE])
        .permission(Permission::Owner)
        .permission(Permission::WriteAccess)
        .authenticate(&state, &token)
        .await?
        .resolve::<T>(&state, T::KEY, &mut params)
        .await?
        .authorize(&state)?;

    let id = target.key();
    state
        .db
        .commit_or_abort(T::DELETE_FAILED, move |conn| {
            store::delete::<T>(conn, &id)?;
            Ok(())
        })
        .await?;

    info!(user_id = principal.user.id, kind = T::KIND, "Record deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_specs_cover_label_fields() {
        assert!(License::PATCH.allows(License::LABEL_FIELD));
        assert!(Organization::PATCH.allows(Organization::LABEL_FIELD));
        assert!(Publisher::PATCH.allows(Publisher::LABEL_FIELD));
        assert!(Source::PATCH.allows(Source::LABEL_FIELD));
        assert!(Reference::PATCH.allows(Reference::LABEL_FIELD));
    }

    #[test]
    fn test_publisher_ids_are_generated() {
        let assigned = <Publisher as Creatable>::assigned(4);
        assert_eq!(assigned["id"].as_str().map(str::len), Some(32));
        assert_eq!(<License as Creatable>::assigned(4)["id"], 0);
    }
}
