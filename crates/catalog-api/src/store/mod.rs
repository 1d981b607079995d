//! Persistence layer
//!
//! Plain functions over a borrowed [`rusqlite::Connection`]. They neither
//! open connections nor manage transactions; callers run them inside
//! [`crate::db::Database::read`] or [`crate::db::Database::commit_or_abort`].
//!
//! Lookups shared by every table (by id, paging, by owner, delete) are
//! generic over [`Entity`]; inserts and updates are written per table.

use prism_catalog_core::{now_timestamp, CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub mod auth;
pub mod comments;
pub mod datasets;
pub mod provenance;
pub mod stories;
pub mod users;

/// An offset/limit window over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub const fn new(offset: i64, limit: i64) -> Self {
        Page { offset, limit }
    }

    /// Every row. Used for nested collections that are not paginated.
    pub const fn unbounded() -> Self {
        Page {
            offset: 0,
            limit: -1,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(0, crate::config::DEFAULT_PAGE_LIMIT)
    }
}

/// A table row type with a primary key addressable as text.
pub trait Entity: Sized + Send + 'static {
    /// Human-readable kind, used in "does not exist" messages
    const KIND: &'static str;
    const TABLE: &'static str;
    /// Column list matching [`Entity::from_row`]
    const COLUMNS: &'static str;
    /// Column holding the owning user's id
    const OWNER_COLUMN: &'static str = "contributor_id";
    /// Extra predicate every lookup must satisfy
    const VISIBLE: &'static str = "1 = 1";
    const ORDER_BY: &'static str = "created DESC, id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Look up an entity by primary key. The key must match the stored id's
/// canonical text exactly, so `1.0` or `01` never resolve integer id 1.
pub fn find<E: Entity>(conn: &Connection, id: &str) -> Result<Option<E>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1 AND CAST(id AS TEXT) = ?1 AND {}",
        E::COLUMNS,
        E::TABLE,
        E::VISIBLE
    );
    Ok(conn.query_row(&sql, [id], E::from_row).optional()?)
}

/// Like [`find`], failing with a not-found error carrying `id`.
pub fn get<E: Entity>(conn: &Connection, id: &str) -> Result<E> {
    find::<E>(conn, id)?.ok_or_else(|| CatalogError::not_found(E::KIND, id))
}

pub fn list<E: Entity>(conn: &Connection, page: Page) -> Result<Vec<E>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT ?1 OFFSET ?2",
        E::COLUMNS,
        E::TABLE,
        E::VISIBLE,
        E::ORDER_BY
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![page.limit, page.offset], E::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Entities contributed by `user_id`.
pub fn list_by_owner<E: Entity>(conn: &Connection, user_id: i64, page: Page) -> Result<Vec<E>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 AND {} ORDER BY {} LIMIT ?2 OFFSET ?3",
        E::COLUMNS,
        E::TABLE,
        E::OWNER_COLUMN,
        E::VISIBLE,
        E::ORDER_BY
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, page.limit, page.offset], E::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Hard delete. Returns whether a row was removed.
pub fn delete<E: Entity>(conn: &Connection, id: &str) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", E::TABLE);
    Ok(conn.execute(&sql, [id])? > 0)
}

/// Whether an SQLite error is a uniqueness or primary-key violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Run a write, turning a duplicate key into a conflict with `message`.
pub(crate) fn execute_unique(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    message: &str,
) -> Result<()> {
    match conn.execute(sql, params) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(CatalogError::ConflictError(message.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Join table recording which users starred which rows of a target table.
pub(crate) struct StarTable {
    pub link_table: &'static str,
    pub target_column: &'static str,
    pub target_table: &'static str,
}

/// Record a star and bump the target's counter. A second star by the same
/// user is a conflict and leaves the counter untouched.
pub(crate) fn add_star(
    conn: &Connection,
    table: &StarTable,
    user_id: i64,
    target_id: &str,
) -> Result<()> {
    execute_unique(
        conn,
        &format!(
            "INSERT INTO {} (user_id, {}, created) VALUES (?1, ?2, ?3)",
            table.link_table, table.target_column
        ),
        params![user_id, target_id, now_timestamp()],
        "You have already starred this",
    )?;
    conn.execute(
        &format!("UPDATE {} SET stars = stars + 1 WHERE id = ?1", table.target_table),
        [target_id],
    )?;
    Ok(())
}

/// Remove a star. Returns whether one existed.
pub(crate) fn remove_star(
    conn: &Connection,
    table: &StarTable,
    user_id: i64,
    target_id: &str,
) -> Result<bool> {
    let removed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE user_id = ?1 AND {} = ?2",
            table.link_table, table.target_column
        ),
        params![user_id, target_id],
    )?;
    if removed > 0 {
        conn.execute(
            &format!(
                "UPDATE {} SET stars = MAX(stars - 1, 0) WHERE id = ?1",
                table.target_table
            ),
            [target_id],
        )?;
    }
    Ok(removed > 0)
}
