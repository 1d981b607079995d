//! Prism Catalog Core
//!
//! Domain model, field-visibility schemas and the SQLite DDL for the Prism
//! data catalog.
//!
//! The crate is deliberately free of any HTTP concerns: the API crate
//! composes these types into its request pipeline, and the CLI uses them to
//! bootstrap a database.
//!
//! # Modules
//!
//! - [`users`]: principals and their static-role bitmask
//! - [`auth`]: OAuth2 clients, grants and tokens
//! - [`datasets`]: datasets and their provenance metadata
//! - [`stories`]: stories with type-specific details
//! - [`comments`]: comments on datasets and stories
//! - [`schema`]: declarative output projection and input filtering
//! - [`patch`]: the `replace`-only JSON-Patch subset used by updates
//! - [`validation`]: field-level input validation

use std::collections::BTreeMap;

pub mod auth;
pub mod comments;
pub mod datasets;
pub mod patch;
pub mod schema;
pub mod stories;
pub mod users;
pub mod validation;

pub use auth::{OAuth2Client, OAuth2Grant, OAuth2Token};
pub use comments::{Comment, CommentTarget};
pub use datasets::{Dataset, License, Organization, Publisher, Reference, Source};
pub use stories::{Story, StoryDetails, StoryType};
pub use users::{StaticRole, StaticRoles, User};

/// Field name → list of messages, the payload of a validation failure.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// An entity with an owning principal.
///
/// The permission evaluator compares `owner_id` with the requesting
/// principal's id; `None` means nobody owns the entity and only
/// administrators pass an ownership check.
pub trait Owned {
    fn owner_id(&self) -> Option<i64>;
}

/// Generate a new text primary key (32 lowercase hex characters).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current UTC time in the RFC 3339 form stored in timestamp columns.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{kind} \"{id}\" does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict detected: {0}")]
    ConflictError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input")]
    InvalidFields(FieldErrors),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl CatalogError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CatalogError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// A single-field validation failure.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        CatalogError::InvalidFields(errors)
    }

    /// Whether this wraps an SQLite constraint violation (unique, foreign
    /// key, check or not-null).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            CatalogError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::SerializationError(err.to_string())
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Initialize the SQLite schema for the catalog.
///
/// Every statement is `IF NOT EXISTS`, so this is safe to run on each start.
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL DEFAULT '',
            middle_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            organization TEXT,
            github TEXT,
            country TEXT,
            bio TEXT,
            followers INTEGER NOT NULL DEFAULT 0 CHECK (followers >= 0),
            following INTEGER NOT NULL DEFAULT 0 CHECK (following >= 0),
            static_roles INTEGER NOT NULL DEFAULT 0,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_followers (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            follower_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created TEXT NOT NULL,
            PRIMARY KEY (user_id, follower_id)
        );

        CREATE TABLE IF NOT EXISTS oauth2_clients (
            client_id TEXT PRIMARY KEY,
            client_secret_hash TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            default_scopes TEXT NOT NULL,
            redirect_uris TEXT NOT NULL DEFAULT '',
            created TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS oauth2_grants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            client_id TEXT NOT NULL REFERENCES oauth2_clients(client_id) ON DELETE CASCADE,
            code TEXT NOT NULL,
            redirect_uri TEXT NOT NULL DEFAULT '',
            scopes TEXT NOT NULL,
            expires TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS oauth2_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id TEXT NOT NULL REFERENCES oauth2_clients(client_id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token_type TEXT NOT NULL DEFAULT 'Bearer',
            access_token TEXT NOT NULL UNIQUE,
            refresh_token TEXT UNIQUE,
            scopes TEXT NOT NULL,
            expires TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS licenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            web TEXT,
            type TEXT,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS organizations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            email TEXT,
            web TEXT,
            country TEXT,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS publishers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            department TEXT,
            web TEXT,
            email TEXT,
            role TEXT,
            organization_id INTEGER REFERENCES organizations(id) ON DELETE SET NULL,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            homepage TEXT,
            version TEXT,
            keywords TEXT,
            image TEXT,
            temporal TEXT,
            spatial TEXT,
            access_level TEXT,
            copyrights TEXT,
            accrual_periodicity TEXT,
            specification TEXT,
            data_quality INTEGER NOT NULL DEFAULT 0,
            data_dictionary TEXT,
            category TEXT,
            issued_time TEXT,
            language TEXT,
            stars INTEGER NOT NULL DEFAULT 0 CHECK (stars >= 0),
            license_id INTEGER REFERENCES licenses(id),
            organization_id INTEGER REFERENCES organizations(id),
            publisher_id TEXT REFERENCES publishers(id),
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            dataset_id TEXT REFERENCES datasets(id) ON DELETE CASCADE,
            title TEXT NOT NULL UNIQUE,
            access_url TEXT NOT NULL,
            download_url TEXT,
            email TEXT,
            description TEXT,
            format TEXT NOT NULL DEFAULT '',
            media_type TEXT NOT NULL DEFAULT '',
            schema TEXT,
            snapshot TEXT,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dataset_references (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
            title TEXT NOT NULL UNIQUE,
            reference TEXT NOT NULL,
            snapshot TEXT,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stories (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL UNIQUE,
            web TEXT,
            description TEXT,
            category TEXT,
            type INTEGER NOT NULL DEFAULT 0,
            stars INTEGER NOT NULL DEFAULT 0 CHECK (stars >= 0),
            keywords TEXT,
            issued_time TEXT,
            details TEXT,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dataset_stories (
            dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
            story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            contributor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created TEXT NOT NULL,
            PRIMARY KEY (dataset_id, story_id)
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            comment TEXT NOT NULL,
            target_id TEXT NOT NULL,
            target_type INTEGER NOT NULL,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            stars INTEGER NOT NULL DEFAULT 0,
            created TEXT NOT NULL,
            updated TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_star_datasets (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
            created TEXT NOT NULL,
            PRIMARY KEY (user_id, dataset_id)
        );

        CREATE TABLE IF NOT EXISTS user_star_stories (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            story_id TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            created TEXT NOT NULL,
            PRIMARY KEY (user_id, story_id)
        );

        CREATE INDEX IF NOT EXISTS idx_tokens_refresh ON oauth2_tokens(refresh_token);
        CREATE INDEX IF NOT EXISTS idx_tokens_user ON oauth2_tokens(user_id);
        CREATE INDEX IF NOT EXISTS idx_clients_user ON oauth2_clients(user_id);
        CREATE INDEX IF NOT EXISTS idx_datasets_contributor ON datasets(contributor_id);
        CREATE INDEX IF NOT EXISTS idx_sources_dataset ON sources(dataset_id);
        CREATE INDEX IF NOT EXISTS idx_references_dataset ON dataset_references(dataset_id);
        CREATE INDEX IF NOT EXISTS idx_stories_contributor ON stories(contributor_id);
        CREATE INDEX IF NOT EXISTS idx_dataset_stories_story ON dataset_stories(story_id);
        CREATE INDEX IF NOT EXISTS idx_comments_target ON comments(target_type, target_id);
        CREATE INDEX IF NOT EXISTS idx_comments_user ON comments(user_id);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initialization_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).expect("first init");
        init_sqlite_schema(&conn).expect("second init");

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 16);
    }

    #[test]
    fn test_constraint_violation_detection() {
        let conn = Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();
        let now = now_timestamp();

        conn.execute(
            "INSERT INTO licenses (title, created, updated) VALUES ('MIT', ?1, ?1)",
            [&now],
        )
        .unwrap();
        let err: CatalogError = conn
            .execute(
                "INSERT INTO licenses (title, created, updated) VALUES ('MIT', ?1, ?1)",
                [&now],
            )
            .unwrap_err()
            .into();

        assert!(err.is_constraint_violation());
        assert!(!CatalogError::Other("x".into()).is_constraint_violation());
    }

    #[test]
    fn test_not_found_message_carries_id() {
        let err = CatalogError::not_found("User", 42);
        assert_eq!(err.to_string(), "User \"42\" does not exist");
    }

    #[test]
    fn test_new_id_is_hex() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_id());
    }
}
