//! Datasets, their stars and their links to stories

use prism_catalog_core::datasets::{License, Organization, Publisher, Reference, Source};
use prism_catalog_core::users::User;
use prism_catalog_core::{now_timestamp, CatalogError, Dataset, Result};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{execute_unique, provenance, Entity, Page, StarTable};

const DATASET_STARS: StarTable = StarTable {
    link_table: "user_star_datasets",
    target_column: "dataset_id",
    target_table: "datasets",
};

impl Entity for Dataset {
    const KIND: &'static str = "Dataset";
    const TABLE: &'static str = "datasets";
    const COLUMNS: &'static str = "id, name, title, description, homepage, version, keywords, \
         image, temporal, spatial, access_level, copyrights, accrual_periodicity, specification, \
         data_quality, data_dictionary, category, issued_time, language, stars, license_id, \
         organization_id, publisher_id, contributor_id, created, updated, deleted";
    const VISIBLE: &'static str = "deleted = 0";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Dataset {
            id: row.get(0)?,
            name: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            homepage: row.get(4)?,
            version: row.get(5)?,
            keywords: row.get(6)?,
            image: row.get(7)?,
            temporal: row.get(8)?,
            spatial: row.get(9)?,
            access_level: row.get(10)?,
            copyrights: row.get(11)?,
            accrual_periodicity: row.get(12)?,
            specification: row.get(13)?,
            data_quality: row.get(14)?,
            data_dictionary: row.get(15)?,
            category: row.get(16)?,
            issued_time: row.get(17)?,
            language: row.get(18)?,
            stars: row.get(19)?,
            license_id: row.get(20)?,
            organization_id: row.get(21)?,
            publisher_id: row.get(22)?,
            contributor_id: row.get(23)?,
            created: row.get(24)?,
            updated: row.get(25)?,
            deleted: row.get(26)?,
        })
    }
}

pub fn insert(conn: &Connection, dataset: &Dataset) -> Result<Dataset> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO datasets (id, name, title, description, homepage, version, keywords, image,
             temporal, spatial, access_level, copyrights, accrual_periodicity, specification,
             data_quality, data_dictionary, category, issued_time, language, license_id,
             organization_id, publisher_id, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
             ?19, ?20, ?21, ?22, ?23, ?24, ?24)",
        params![
            dataset.id,
            dataset.name,
            dataset.title,
            dataset.description,
            dataset.homepage,
            dataset.version,
            dataset.keywords,
            dataset.image,
            dataset.temporal,
            dataset.spatial,
            dataset.access_level,
            dataset.copyrights,
            dataset.accrual_periodicity,
            dataset.specification,
            dataset.data_quality,
            dataset.data_dictionary,
            dataset.category,
            dataset.issued_time,
            dataset.language,
            dataset.license_id,
            dataset.organization_id,
            dataset.publisher_id,
            dataset.contributor_id,
            now,
        ],
        "A dataset with this name already exists",
    )?;
    super::get(conn, &dataset.id)
}

/// Persist the writable columns. Stars, ownership and the delete flag are
/// changed only through their dedicated operations.
pub fn update(conn: &Connection, dataset: &Dataset) -> Result<Dataset> {
    let sql = "UPDATE datasets SET name = ?2, title = ?3, description = ?4, homepage = ?5,
             version = ?6, keywords = ?7, image = ?8, temporal = ?9, spatial = ?10,
             access_level = ?11, copyrights = ?12, accrual_periodicity = ?13,
             specification = ?14, data_quality = ?15, data_dictionary = ?16, category = ?17,
             issued_time = ?18, language = ?19, license_id = ?20, organization_id = ?21,
             publisher_id = ?22, updated = ?23
         WHERE id = ?1 AND deleted = 0";
    execute_unique(
        conn,
        sql,
        params![
            dataset.id,
            dataset.name,
            dataset.title,
            dataset.description,
            dataset.homepage,
            dataset.version,
            dataset.keywords,
            dataset.image,
            dataset.temporal,
            dataset.spatial,
            dataset.access_level,
            dataset.copyrights,
            dataset.accrual_periodicity,
            dataset.specification,
            dataset.data_quality,
            dataset.data_dictionary,
            dataset.category,
            dataset.issued_time,
            dataset.language,
            dataset.license_id,
            dataset.organization_id,
            dataset.publisher_id,
            now_timestamp(),
        ],
        "A dataset with this name already exists",
    )?;
    super::get(conn, &dataset.id)
}

pub fn soft_delete(conn: &Connection, id: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE datasets SET deleted = 1, updated = ?2 WHERE id = ?1 AND deleted = 0",
        params![id, now_timestamp()],
    )?;
    if updated == 0 {
        return Err(CatalogError::not_found(Dataset::KIND, id));
    }
    Ok(())
}

pub fn add_star(conn: &Connection, user_id: i64, dataset_id: &str) -> Result<()> {
    super::add_star(conn, &DATASET_STARS, user_id, dataset_id)
}

pub fn remove_star(conn: &Connection, user_id: i64, dataset_id: &str) -> Result<bool> {
    super::remove_star(conn, &DATASET_STARS, user_id, dataset_id)
}

/// Ids of stories linked to a dataset.
pub fn story_ids(conn: &Connection, dataset_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT story_id FROM dataset_stories WHERE dataset_id = ?1 ORDER BY created, story_id",
    )?;
    let ids = stmt
        .query_map([dataset_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Link a story to a dataset on behalf of `contributor_id`.
pub fn link_story(
    conn: &Connection,
    dataset_id: &str,
    story_id: &str,
    contributor_id: i64,
) -> Result<()> {
    execute_unique(
        conn,
        "INSERT INTO dataset_stories (dataset_id, story_id, contributor_id, created)
         VALUES (?1, ?2, ?3, ?4)",
        params![dataset_id, story_id, contributor_id, now_timestamp()],
        "Linked already",
    )
}

/// Remove a link created by `contributor_id`. Links made by other users are
/// left in place; returns whether anything was removed.
pub fn unlink_story(
    conn: &Connection,
    dataset_id: &str,
    story_id: &str,
    contributor_id: i64,
) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM dataset_stories
         WHERE dataset_id = ?1 AND story_id = ?2 AND contributor_id = ?3",
        params![dataset_id, story_id, contributor_id],
    )?;
    Ok(removed > 0)
}

/// A dataset with its related rows, shaped for the dataset schema.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetView {
    #[serde(flatten)]
    pub dataset: Dataset,
    pub contributor: Option<User>,
    pub license: Option<License>,
    pub organization: Option<Organization>,
    pub publisher: Option<Publisher>,
    pub sources: Vec<Source>,
    pub references: Vec<Reference>,
    pub story_ids: Vec<String>,
}

fn related<E: Entity>(conn: &Connection, id: Option<String>) -> Result<Option<E>> {
    match id {
        Some(id) => super::find(conn, &id),
        None => Ok(None),
    }
}

pub fn view(conn: &Connection, dataset: Dataset) -> Result<DatasetView> {
    Ok(DatasetView {
        contributor: related(conn, dataset.contributor_id.map(|id| id.to_string()))?,
        license: related(conn, dataset.license_id.map(|id| id.to_string()))?,
        organization: related(conn, dataset.organization_id.map(|id| id.to_string()))?,
        publisher: related(conn, dataset.publisher_id.clone())?,
        sources: provenance::sources_of(conn, &dataset.id, Page::unbounded())?,
        references: provenance::references_of(conn, &dataset.id, Page::unbounded())?,
        story_ids: story_ids(conn, &dataset.id)?,
        dataset,
    })
}

pub fn views(conn: &Connection, datasets: Vec<Dataset>) -> Result<Vec<DatasetView>> {
    datasets
        .into_iter()
        .map(|dataset| view(conn, dataset))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, users};
    use prism_catalog_core::new_id;
    use prism_catalog_core::datasets::DATASET_SCHEMA;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        prism_catalog_core::init_sqlite_schema(&conn).unwrap();
        let user = users::insert(
            &conn,
            &users::NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                password_hash: "x".into(),
                ..users::NewUser::default()
            },
        )
        .unwrap();
        (conn, user.id)
    }

    fn sample(name: &str, contributor_id: i64) -> Dataset {
        Dataset {
            id: new_id(),
            name: name.to_string(),
            title: format!("{} title", name),
            description: None,
            homepage: None,
            version: None,
            keywords: None,
            image: None,
            temporal: None,
            spatial: None,
            access_level: None,
            copyrights: None,
            accrual_periodicity: None,
            specification: None,
            data_quality: false,
            data_dictionary: None,
            category: None,
            issued_time: None,
            language: None,
            stars: 0,
            license_id: None,
            organization_id: None,
            publisher_id: None,
            contributor_id: Some(contributor_id),
            created: String::new(),
            updated: String::new(),
            deleted: false,
        }
    }

    #[test]
    fn test_soft_delete_hides_dataset() {
        let (conn, uid) = setup();
        let dataset = insert(&conn, &sample("d1", uid)).unwrap();
        soft_delete(&conn, &dataset.id).unwrap();

        assert!(store::find::<Dataset>(&conn, &dataset.id).unwrap().is_none());
        assert!(store::list::<Dataset>(&conn, Page::default()).unwrap().is_empty());
        assert!(matches!(
            soft_delete(&conn, &dataset.id).unwrap_err(),
            CatalogError::NotFound { .. }
        ));
    }

    #[test]
    fn test_star_once() {
        let (conn, uid) = setup();
        let dataset = insert(&conn, &sample("d1", uid)).unwrap();

        add_star(&conn, uid, &dataset.id).unwrap();
        assert!(matches!(
            add_star(&conn, uid, &dataset.id).unwrap_err(),
            CatalogError::ConflictError(_)
        ));
        assert_eq!(store::get::<Dataset>(&conn, &dataset.id).unwrap().stars, 1);

        assert!(remove_star(&conn, uid, &dataset.id).unwrap());
        assert!(!remove_star(&conn, uid, &dataset.id).unwrap());
        assert_eq!(store::get::<Dataset>(&conn, &dataset.id).unwrap().stars, 0);
    }

    #[test]
    fn test_view_carries_relations() {
        let (conn, uid) = setup();
        let license = provenance::license_by_title(&conn, "MIT", uid).unwrap();
        let mut dataset = sample("d1", uid);
        dataset.license_id = Some(license.id);
        let dataset = insert(&conn, &dataset).unwrap();

        let out = DATASET_SCHEMA
            .serialize(&view(&conn, dataset).unwrap())
            .unwrap();
        assert_eq!(out["license"]["title"], "MIT");
        assert_eq!(out["contributor"]["username"], "alice");
        assert_eq!(out["story_count"], 0);
        assert_eq!(out["sources"], serde_json::json!([]));
    }
}
