//! Comments on datasets and stories

use prism_catalog_core::comments::{Comment, CommentTarget};
use prism_catalog_core::{now_timestamp, Result};
use rusqlite::{params, Connection, Row};

use super::{Entity, Page};

impl Entity for Comment {
    const KIND: &'static str = "Comment";
    const TABLE: &'static str = "comments";
    const COLUMNS: &'static str =
        "id, comment, target_id, target_type, user_id, stars, created, updated";
    const OWNER_COLUMN: &'static str = "user_id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Comment {
            id: row.get(0)?,
            comment: row.get(1)?,
            target_id: row.get(2)?,
            target_type: row.get(3)?,
            user_id: row.get(4)?,
            stars: row.get(5)?,
            created: row.get(6)?,
            updated: row.get(7)?,
        })
    }
}

pub fn insert(conn: &Connection, comment: &Comment) -> Result<Comment> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO comments (id, comment, target_id, target_type, user_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            comment.id,
            comment.comment,
            comment.target_id,
            comment.target_type,
            comment.user_id,
            now,
        ],
    )?;
    super::get(conn, &comment.id)
}

pub fn update(conn: &Connection, comment: &Comment) -> Result<Comment> {
    conn.execute(
        "UPDATE comments SET comment = ?2, updated = ?3 WHERE id = ?1",
        params![comment.id, comment.comment, now_timestamp()],
    )?;
    super::get(conn, &comment.id)
}

/// Comments on one dataset or story, oldest first.
pub fn on_target(
    conn: &Connection,
    target: CommentTarget,
    target_id: &str,
    page: Page,
) -> Result<Vec<Comment>> {
    let sql = format!(
        "SELECT {} FROM comments WHERE target_type = ?1 AND target_id = ?2
         ORDER BY created, id LIMIT ?3 OFFSET ?4",
        Comment::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(
            params![target.as_i64(), target_id, page.limit, page.offset],
            Comment::from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, users};
    use prism_catalog_core::new_id;

    #[test]
    fn test_comments_by_target() {
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

        let comment = insert(
            &conn,
            &Comment {
                id: new_id(),
                comment: "Great data".into(),
                target_id: "d1".into(),
                target_type: CommentTarget::Dataset.as_i64(),
                user_id: Some(user.id),
                stars: 0,
                created: String::new(),
                updated: String::new(),
            },
        )
        .unwrap();

        let on_dataset = on_target(&conn, CommentTarget::Dataset, "d1", Page::default()).unwrap();
        assert_eq!(on_dataset, vec![comment.clone()]);
        assert!(on_target(&conn, CommentTarget::Story, "d1", Page::default())
            .unwrap()
            .is_empty());
        assert_eq!(
            store::list_by_owner::<Comment>(&conn, user.id, Page::default())
                .unwrap()
                .len(),
            1
        );
    }
}
