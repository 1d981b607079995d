//! Users, credentials and the follower graph

use prism_catalog_core::users::{StaticRoles, User};
use prism_catalog_core::{now_timestamp, CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{execute_unique, Entity, Page};

impl Entity for User {
    const KIND: &'static str = "User";
    const TABLE: &'static str = "users";
    const COLUMNS: &'static str = "id, username, email, first_name, middle_name, last_name, \
         organization, github, country, bio, followers, following, created, updated, static_roles";
    const OWNER_COLUMN: &'static str = "id";
    const ORDER_BY: &'static str = "id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            first_name: row.get(3)?,
            middle_name: row.get(4)?,
            last_name: row.get(5)?,
            organization: row.get(6)?,
            github: row.get(7)?,
            country: row.get(8)?,
            bio: row.get(9)?,
            followers: row.get(10)?,
            following: row.get(11)?,
            created: row.get(12)?,
            updated: row.get(13)?,
            static_roles: StaticRoles::from_bits(row.get(14)?),
        })
    }
}

/// A registration, with the password already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub organization: Option<String>,
    pub github: Option<String>,
    pub country: Option<String>,
    pub bio: Option<String>,
    pub static_roles: StaticRoles,
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    super::find(conn, &id.to_string())
}

pub fn get_by_id(conn: &Connection, id: i64) -> Result<User> {
    find_by_id(conn, id)?.ok_or_else(|| CatalogError::not_found(User::KIND, id))
}

pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?1", User::COLUMNS);
    Ok(conn.query_row(&sql, [username], User::from_row).optional()?)
}

/// The user together with their stored password hash.
pub fn find_credentials(conn: &Connection, username: &str) -> Result<Option<(User, String)>> {
    let sql = format!(
        "SELECT {}, password FROM users WHERE username = ?1",
        User::COLUMNS
    );
    let found = conn
        .query_row(&sql, [username], |row| {
            Ok((User::from_row(row)?, row.get::<_, String>(15)?))
        })
        .optional()?;
    Ok(found)
}

pub fn insert(conn: &Connection, user: &NewUser) -> Result<User> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO users (username, password, email, first_name, middle_name, last_name,
             organization, github, country, bio, static_roles, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            user.username,
            user.password_hash,
            user.email,
            user.first_name,
            user.middle_name,
            user.last_name,
            user.organization,
            user.github,
            user.country,
            user.bio,
            user.static_roles.bits(),
            now,
        ],
        "A user with this username or email already exists",
    )?;
    get_by_id(conn, conn.last_insert_rowid())
}

/// Persist profile fields and roles. Counters are owned by [`follow`] and
/// [`unfollow`] and are left alone.
pub fn update(conn: &Connection, user: &User) -> Result<User> {
    let updated = conn.execute(
        "UPDATE users SET email = ?2, first_name = ?3, middle_name = ?4, last_name = ?5,
             organization = ?6, github = ?7, country = ?8, bio = ?9, static_roles = ?10,
             updated = ?11
         WHERE id = ?1",
        params![
            user.id,
            user.email,
            user.first_name,
            user.middle_name,
            user.last_name,
            user.organization,
            user.github,
            user.country,
            user.bio,
            user.static_roles.bits(),
            now_timestamp(),
        ],
    )?;
    if updated == 0 {
        return Err(CatalogError::not_found(User::KIND, user.id));
    }
    get_by_id(conn, user.id)
}

pub fn set_password(conn: &Connection, user_id: i64, password_hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET password = ?2, updated = ?3 WHERE id = ?1",
        params![user_id, password_hash, now_timestamp()],
    )?;
    Ok(())
}

/// Make `follower_id` follow `user_id` and bump both counters.
pub fn follow(conn: &Connection, user_id: i64, follower_id: i64) -> Result<()> {
    execute_unique(
        conn,
        "INSERT INTO user_followers (user_id, follower_id, created) VALUES (?1, ?2, ?3)",
        params![user_id, follower_id, now_timestamp()],
        "You are already following this user",
    )?;
    conn.execute(
        "UPDATE users SET followers = followers + 1 WHERE id = ?1",
        [user_id],
    )?;
    conn.execute(
        "UPDATE users SET following = following + 1 WHERE id = ?1",
        [follower_id],
    )?;
    Ok(())
}

/// Undo [`follow`]. Returns whether a follow existed; counters never drop
/// below zero.
pub fn unfollow(conn: &Connection, user_id: i64, follower_id: i64) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM user_followers WHERE user_id = ?1 AND follower_id = ?2",
        params![user_id, follower_id],
    )?;
    if removed == 0 {
        return Ok(false);
    }
    conn.execute(
        "UPDATE users SET followers = MAX(followers - 1, 0) WHERE id = ?1",
        [user_id],
    )?;
    conn.execute(
        "UPDATE users SET following = MAX(following - 1, 0) WHERE id = ?1",
        [follower_id],
    )?;
    Ok(true)
}

fn related(
    conn: &Connection,
    join_on: &str,
    filter_column: &str,
    user_id: i64,
    page: Page,
) -> Result<Vec<User>> {
    let columns = User::COLUMNS
        .split(',')
        .map(|column| format!("u.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM users u JOIN user_followers f ON {} WHERE {} = ?1
         ORDER BY f.created DESC, u.id LIMIT ?2 OFFSET ?3",
        columns, join_on, filter_column
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params![user_id, page.limit, page.offset], User::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

/// Users following `user_id`.
pub fn followers(conn: &Connection, user_id: i64, page: Page) -> Result<Vec<User>> {
    related(conn, "u.id = f.follower_id", "f.user_id", user_id, page)
}

/// Users `user_id` follows.
pub fn following(conn: &Connection, user_id: i64, page: Page) -> Result<Vec<User>> {
    related(conn, "u.id = f.user_id", "f.follower_id", user_id, page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        prism_catalog_core::init_sqlite_schema(&conn).unwrap();
        conn
    }

    fn register(conn: &Connection, username: &str) -> User {
        insert(
            conn,
            &NewUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                password_hash: "hash".to_string(),
                static_roles: StaticRoles::new_account(),
                ..NewUser::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let conn = conn();
        let alice = register(&conn, "alice");
        assert!(alice.is_active());

        let (found, hash) = find_credentials(&conn, "alice").unwrap().unwrap();
        assert_eq!(found, alice);
        assert_eq!(hash, "hash");
        assert!(find_by_username(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_conflicts() {
        let conn = conn();
        register(&conn, "alice");
        let err = insert(
            &conn,
            &NewUser {
                username: "alice".to_string(),
                email: "other@example.com".to_string(),
                password_hash: "x".to_string(),
                ..NewUser::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::ConflictError(_)));
    }

    #[test]
    fn test_only_canonical_ids_match() {
        let conn = conn();
        register(&conn, "alice");
        assert!(super::super::find::<User>(&conn, "1").unwrap().is_some());
        for id in ["abc", "1.0", "01", " 1", "1e0"] {
            assert!(super::super::find::<User>(&conn, id).unwrap().is_none(), "{} matched", id);
        }
    }

    #[test]
    fn test_follow_counters() {
        let conn = conn();
        let alice = register(&conn, "alice");
        let bob = register(&conn, "bob");

        follow(&conn, alice.id, bob.id).unwrap();
        let err = follow(&conn, alice.id, bob.id).unwrap_err();
        assert!(matches!(err, CatalogError::ConflictError(_)));

        assert_eq!(get_by_id(&conn, alice.id).unwrap().followers, 1);
        assert_eq!(get_by_id(&conn, bob.id).unwrap().following, 1);
        assert_eq!(followers(&conn, alice.id, Page::default()).unwrap()[0].id, bob.id);
        assert_eq!(following(&conn, bob.id, Page::default()).unwrap()[0].id, alice.id);

        assert!(unfollow(&conn, alice.id, bob.id).unwrap());
        assert!(!unfollow(&conn, alice.id, bob.id).unwrap());
        assert_eq!(get_by_id(&conn, alice.id).unwrap().followers, 0);
        assert_eq!(get_by_id(&conn, bob.id).unwrap().following, 0);
    }
}
