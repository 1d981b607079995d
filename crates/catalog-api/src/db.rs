//! SQLite access for request handlers
//!
//! Every operation opens its own connection on the blocking thread pool, so a
//! connection never lives across an `.await`. Reads run in autocommit mode;
//! writes that touch more than one row go through [`Database::commit_or_abort`],
//! which runs the closure in a single `IMMEDIATE` transaction and maps storage
//! failures onto the error envelope. Taking the write lock up front makes
//! concurrent writers queue on the busy timeout instead of failing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection with the pragmas every catalog connection needs.
pub fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Handle to the catalog database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    path: Arc<PathBuf>,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the schema if it does not exist yet.
    pub async fn initialize(&self) -> ApiResult<()> {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            prism_catalog_core::init_sqlite_schema(&conn)?;
            Ok::<_, ApiError>(())
        })
        .await??;

        info!(path = %self.path.display(), "Catalog database initialized");
        Ok(())
    }

    /// Run `f` against an autocommit connection.
    pub async fn read<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Connection) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            f(&conn)
        })
        .await?
    }

    /// Run `f` in one transaction; commit on success, roll back otherwise.
    ///
    /// Errors the closure raised on purpose (not found, forbidden, conflict,
    /// validation, bad request) pass through unchanged. Storage failures are
    /// reported as `"<default_message>: <detail>"`: constraint violations
    /// with 409, anything else with 400.
    pub async fn commit_or_abort<T, F>(&self, default_message: &'static str, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Connection) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = Arc::clone(&self.path);
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok::<_, ApiError>(value)
        })
        .await?;

        result.map_err(|err| abort(default_message, err))
    }
}

fn abort(default_message: &str, err: ApiError) -> ApiError {
    match err {
        err if err.is_constraint_violation() => {
            warn!(error = %err, "{}", default_message);
            match err {
                ApiError::Database(e) => ApiError::Conflict(format!("{}: {}", default_message, e)),
                other => other,
            }
        }
        ApiError::Database(e) => {
            error!(error = %e, "{}", default_message);
            ApiError::BadRequest(format!("{}: {}", default_message, e))
        }
        ApiError::Internal(detail) => {
            error!(error = %detail, "{}", default_message);
            ApiError::BadRequest(default_message.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tempfile::tempdir;

    async fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("catalog.db"));
        db.initialize().await.unwrap();
        (dir, db)
    }

    fn insert_license(conn: &Connection, title: &str) -> ApiResult<()> {
        conn.execute(
            "INSERT INTO licenses (title, created, updated) VALUES (?1, '', '')",
            [title],
        )?;
        Ok(())
    }

    fn count_licenses(conn: &Connection) -> ApiResult<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))?)
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let (_dir, db) = test_db().await;
        db.commit_or_abort("Failed to create license", |conn| insert_license(conn, "MIT"))
            .await
            .unwrap();
        assert_eq!(db.read(count_licenses).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_conflict_and_rolls_back() {
        let (_dir, db) = test_db().await;
        db.commit_or_abort("seed", |conn| insert_license(conn, "MIT"))
            .await
            .unwrap();

        let err = db
            .commit_or_abort("Failed to create license", |conn| {
                insert_license(conn, "Apache-2.0")?;
                insert_license(conn, "MIT")
            })
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("Failed to create license"));
        assert_eq!(db.read(count_licenses).await.unwrap(), 1, "rolled back");
    }

    #[tokio::test]
    async fn test_typed_errors_pass_through() {
        let (_dir, db) = test_db().await;
        let err = db
            .commit_or_abort("ignored", |conn| {
                insert_license(conn, "MIT")?;
                Err::<(), _>(ApiError::Forbidden("nope".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(db.read(count_licenses).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_storage_errors_are_bad_request() {
        let (_dir, db) = test_db().await;
        let err = db
            .commit_or_abort("Failed to query", |conn| {
                conn.execute("UPDATE no_such_table SET x = 1", [])?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
