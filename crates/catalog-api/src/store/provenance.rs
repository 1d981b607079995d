//! Licenses, organizations, publishers, sources and references

use prism_catalog_core::datasets::{License, Organization, Publisher, Reference, Source};
use prism_catalog_core::{new_id, now_timestamp, CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{execute_unique, Entity, Page};

impl Entity for License {
    const KIND: &'static str = "License";
    const TABLE: &'static str = "licenses";
    const COLUMNS: &'static str = "id, title, web, type, contributor_id, created, updated";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(License {
            id: row.get(0)?,
            title: row.get(1)?,
            web: row.get(2)?,
            license_type: row.get(3)?,
            contributor_id: row.get(4)?,
            created: row.get(5)?,
            updated: row.get(6)?,
        })
    }
}

impl Entity for Organization {
    const KIND: &'static str = "Organization";
    const TABLE: &'static str = "organizations";
    const COLUMNS: &'static str = "id, name, email, web, country, contributor_id, created, updated";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Organization {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            web: row.get(3)?,
            country: row.get(4)?,
            contributor_id: row.get(5)?,
            created: row.get(6)?,
            updated: row.get(7)?,
        })
    }
}

impl Entity for Publisher {
    const KIND: &'static str = "Publisher";
    const TABLE: &'static str = "publishers";
    const COLUMNS: &'static str = "id, name, department, web, email, role, organization_id, \
         contributor_id, created, updated";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Publisher {
            id: row.get(0)?,
            name: row.get(1)?,
            department: row.get(2)?,
            web: row.get(3)?,
            email: row.get(4)?,
            role: row.get(5)?,
            organization_id: row.get(6)?,
            contributor_id: row.get(7)?,
            created: row.get(8)?,
            updated: row.get(9)?,
        })
    }
}

impl Entity for Source {
    const KIND: &'static str = "Source";
    const TABLE: &'static str = "sources";
    const COLUMNS: &'static str = "id, dataset_id, title, access_url, download_url, email, \
         description, format, media_type, schema, snapshot, contributor_id, created, updated";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Source {
            id: row.get(0)?,
            dataset_id: row.get(1)?,
            title: row.get(2)?,
            access_url: row.get(3)?,
            download_url: row.get(4)?,
            email: row.get(5)?,
            description: row.get(6)?,
            format: row.get(7)?,
            media_type: row.get(8)?,
            schema: row.get(9)?,
            snapshot: row.get(10)?,
            contributor_id: row.get(11)?,
            created: row.get(12)?,
            updated: row.get(13)?,
        })
    }
}

impl Entity for Reference {
    const KIND: &'static str = "Reference";
    const TABLE: &'static str = "dataset_references";
    const COLUMNS: &'static str =
        "id, dataset_id, title, reference, snapshot, contributor_id, created, updated";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Reference {
            id: row.get(0)?,
            dataset_id: row.get(1)?,
            title: row.get(2)?,
            reference: row.get(3)?,
            snapshot: row.get(4)?,
            contributor_id: row.get(5)?,
            created: row.get(6)?,
            updated: row.get(7)?,
        })
    }
}

// ============================================================================
// Get-or-create by unique name
// ============================================================================

fn find_by_unique<E: Entity>(conn: &Connection, column: &str, value: &str) -> Result<Option<E>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        E::COLUMNS,
        E::TABLE,
        column
    );
    Ok(conn.query_row(&sql, [value], E::from_row).optional()?)
}

fn resolve_unique<E: Entity>(conn: &Connection, column: &str, value: &str) -> Result<E> {
    find_by_unique(conn, column, value)?.ok_or_else(|| CatalogError::not_found(E::KIND, value))
}

/// The license titled `title`, created on first use.
///
/// `ON CONFLICT DO NOTHING` makes a concurrent creator's row win instead of
/// failing the surrounding transaction.
pub fn license_by_title(conn: &Connection, title: &str, contributor_id: i64) -> Result<License> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO licenses (title, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?3) ON CONFLICT(title) DO NOTHING",
        params![title, contributor_id, now],
    )?;
    resolve_unique(conn, "title", title)
}

pub fn organization_by_name(
    conn: &Connection,
    name: &str,
    contributor_id: i64,
) -> Result<Organization> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO organizations (name, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?3) ON CONFLICT(name) DO NOTHING",
        params![name, contributor_id, now],
    )?;
    resolve_unique(conn, "name", name)
}

pub fn publisher_by_name(conn: &Connection, name: &str, contributor_id: i64) -> Result<Publisher> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO publishers (id, name, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?4) ON CONFLICT(name) DO NOTHING",
        params![new_id(), name, contributor_id, now],
    )?;
    resolve_unique(conn, "name", name)
}

// ============================================================================
// Inserts and updates
// ============================================================================

pub fn insert_license(conn: &Connection, license: &License) -> Result<License> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO licenses (title, web, type, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            license.title,
            license.web,
            license.license_type,
            license.contributor_id,
            now
        ],
        "A license with this title already exists",
    )?;
    super::get(conn, &conn.last_insert_rowid().to_string())
}

pub fn update_license(conn: &Connection, license: &License) -> Result<License> {
    conn.execute(
        "UPDATE licenses SET title = ?2, web = ?3, type = ?4, updated = ?5 WHERE id = ?1",
        params![
            license.id,
            license.title,
            license.web,
            license.license_type,
            now_timestamp()
        ],
    )?;
    super::get(conn, &license.id.to_string())
}

pub fn insert_organization(conn: &Connection, org: &Organization) -> Result<Organization> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO organizations (name, email, web, country, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![org.name, org.email, org.web, org.country, org.contributor_id, now],
        "An organization with this name already exists",
    )?;
    super::get(conn, &conn.last_insert_rowid().to_string())
}

pub fn update_organization(conn: &Connection, org: &Organization) -> Result<Organization> {
    conn.execute(
        "UPDATE organizations SET name = ?2, email = ?3, web = ?4, country = ?5, updated = ?6
         WHERE id = ?1",
        params![
            org.id,
            org.name,
            org.email,
            org.web,
            org.country,
            now_timestamp()
        ],
    )?;
    super::get(conn, &org.id.to_string())
}

pub fn insert_publisher(conn: &Connection, publisher: &Publisher) -> Result<Publisher> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO publishers (id, name, department, web, email, role, organization_id,
             contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            publisher.id,
            publisher.name,
            publisher.department,
            publisher.web,
            publisher.email,
            publisher.role,
            publisher.organization_id,
            publisher.contributor_id,
            now
        ],
        "A publisher with this name already exists",
    )?;
    super::get(conn, &publisher.id)
}

pub fn update_publisher(conn: &Connection, publisher: &Publisher) -> Result<Publisher> {
    conn.execute(
        "UPDATE publishers SET name = ?2, department = ?3, web = ?4, email = ?5, role = ?6,
             organization_id = ?7, updated = ?8
         WHERE id = ?1",
        params![
            publisher.id,
            publisher.name,
            publisher.department,
            publisher.web,
            publisher.email,
            publisher.role,
            publisher.organization_id,
            now_timestamp()
        ],
    )?;
    super::get(conn, &publisher.id)
}

pub fn insert_source(conn: &Connection, source: &Source) -> Result<Source> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO sources (id, dataset_id, title, access_url, download_url, email,
             description, format, media_type, schema, snapshot, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            source.id,
            source.dataset_id,
            source.title,
            source.access_url,
            source.download_url,
            source.email,
            source.description,
            source.format,
            source.media_type,
            source.schema,
            source.snapshot,
            source.contributor_id,
            now
        ],
        "A source with this title already exists",
    )?;
    super::get(conn, &source.id)
}

pub fn update_source(conn: &Connection, source: &Source) -> Result<Source> {
    conn.execute(
        "UPDATE sources SET title = ?2, access_url = ?3, download_url = ?4, email = ?5,
             description = ?6, format = ?7, media_type = ?8, schema = ?9, updated = ?10
         WHERE id = ?1",
        params![
            source.id,
            source.title,
            source.access_url,
            source.download_url,
            source.email,
            source.description,
            source.format,
            source.media_type,
            source.schema,
            now_timestamp()
        ],
    )?;
    super::get(conn, &source.id)
}

pub fn insert_reference(conn: &Connection, reference: &Reference) -> Result<Reference> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO dataset_references (id, dataset_id, title, reference, snapshot,
             contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            reference.id,
            reference.dataset_id,
            reference.title,
            reference.reference,
            reference.snapshot,
            reference.contributor_id,
            now
        ],
        "A reference with this title already exists",
    )?;
    super::get(conn, &reference.id)
}

pub fn update_reference(conn: &Connection, reference: &Reference) -> Result<Reference> {
    conn.execute(
        "UPDATE dataset_references SET title = ?2, reference = ?3, snapshot = ?4, updated = ?5
         WHERE id = ?1",
        params![
            reference.id,
            reference.title,
            reference.reference,
            reference.snapshot,
            now_timestamp()
        ],
    )?;
    super::get(conn, &reference.id)
}

/// Sources attached to `dataset_id`.
pub fn sources_of(conn: &Connection, dataset_id: &str, page: Page) -> Result<Vec<Source>> {
    children(conn, dataset_id, page)
}

/// References citing `dataset_id`.
pub fn references_of(conn: &Connection, dataset_id: &str, page: Page) -> Result<Vec<Reference>> {
    children(conn, dataset_id, page)
}

fn children<E: Entity>(conn: &Connection, dataset_id: &str, page: Page) -> Result<Vec<E>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE dataset_id = ?1 ORDER BY {} LIMIT ?2 OFFSET ?3",
        E::COLUMNS,
        E::TABLE,
        E::ORDER_BY
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![dataset_id, page.limit, page.offset], E::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, users};

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

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (conn, uid) = setup();
        let first = license_by_title(&conn, "MIT", uid).unwrap();
        let second = license_by_title(&conn, "MIT", uid).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store::list::<License>(&conn, Page::default()).unwrap().len(), 1);

        let org = organization_by_name(&conn, "ACME", uid).unwrap();
        assert_eq!(organization_by_name(&conn, "ACME", uid).unwrap().id, org.id);

        let publisher = publisher_by_name(&conn, "Stats Office", uid).unwrap();
        assert_eq!(publisher.id.len(), 32);
        assert_eq!(
            publisher_by_name(&conn, "Stats Office", uid).unwrap().id,
            publisher.id
        );
    }

    #[test]
    fn test_license_update_and_owner_listing() {
        let (conn, uid) = setup();
        let mut license = license_by_title(&conn, "MIT", uid).unwrap();
        license.web = Some("https://opensource.org/licenses/MIT".into());
        let updated = update_license(&conn, &license).unwrap();
        assert_eq!(updated.web, license.web);

        assert_eq!(
            store::list_by_owner::<License>(&conn, uid, Page::default()).unwrap().len(),
            1
        );
        assert!(store::delete::<License>(&conn, &license.id.to_string()).unwrap());
        assert!(store::find::<License>(&conn, &license.id.to_string()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_organization_conflicts() {
        let (conn, uid) = setup();
        organization_by_name(&conn, "ACME", uid).unwrap();
        let org = Organization {
            id: 0,
            name: "ACME".into(),
            email: None,
            web: None,
            country: None,
            contributor_id: Some(uid),
            created: String::new(),
            updated: String::new(),
        };
        assert!(matches!(
            insert_organization(&conn, &org).unwrap_err(),
            CatalogError::ConflictError(_)
        ));
    }
}
