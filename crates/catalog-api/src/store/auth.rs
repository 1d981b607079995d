//! OAuth2 clients and tokens

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use prism_catalog_core::auth::{join_scopes, parse_scopes, OAuth2Client, OAuth2Token};
use prism_catalog_core::{now_timestamp, CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::Page;

const CLIENT_COLUMNS: &str = "client_id, user_id, default_scopes, redirect_uris, created";
const TOKEN_COLUMNS: &str =
    "id, client_id, user_id, token_type, access_token, refresh_token, scopes, expires";

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<OAuth2Client> {
    let scopes: String = row.get(2)?;
    let redirect_uris: String = row.get(3)?;
    Ok(OAuth2Client {
        client_id: row.get(0)?,
        user_id: row.get(1)?,
        default_scopes: parse_scopes(&scopes),
        redirect_uris: redirect_uris.split_whitespace().map(str::to_string).collect(),
        created: row.get(4)?,
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<OAuth2Token> {
    let scopes: String = row.get(6)?;
    let expires: String = row.get(7)?;
    let expires = DateTime::parse_from_rfc3339(&expires)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(OAuth2Token {
        id: row.get(0)?,
        client_id: row.get(1)?,
        user_id: row.get(2)?,
        token_type: row.get(3)?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        scopes: parse_scopes(&scopes),
        expires,
    })
}

pub fn insert_client(
    conn: &Connection,
    client_id: &str,
    secret_hash: &str,
    user_id: i64,
    default_scopes: &BTreeSet<String>,
    redirect_uris: &[String],
) -> Result<OAuth2Client> {
    conn.execute(
        "INSERT INTO oauth2_clients
             (client_id, client_secret_hash, user_id, default_scopes, redirect_uris, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            client_id,
            secret_hash,
            user_id,
            join_scopes(default_scopes),
            redirect_uris.join(" "),
            now_timestamp(),
        ],
    )?;
    find_client(conn, client_id)?
        .map(|(client, _)| client)
        .ok_or_else(|| CatalogError::not_found("OAuth2 client", client_id))
}

/// A client together with its secret hash.
pub fn find_client(conn: &Connection, client_id: &str) -> Result<Option<(OAuth2Client, String)>> {
    let sql = format!(
        "SELECT {}, client_secret_hash FROM oauth2_clients WHERE client_id = ?1",
        CLIENT_COLUMNS
    );
    let found = conn
        .query_row(&sql, [client_id], |row| {
            Ok((client_from_row(row)?, row.get::<_, String>(5)?))
        })
        .optional()?;
    Ok(found)
}

pub fn list_clients(conn: &Connection, user_id: i64, page: Page) -> Result<Vec<OAuth2Client>> {
    let sql = format!(
        "SELECT {} FROM oauth2_clients WHERE user_id = ?1
         ORDER BY created DESC, client_id LIMIT ?2 OFFSET ?3",
        CLIENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let clients = stmt
        .query_map(params![user_id, page.limit, page.offset], client_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(clients)
}

/// A token about to be stored.
#[derive(Debug, Clone)]
pub struct NewToken<'a> {
    pub client_id: &'a str,
    pub user_id: i64,
    pub access_token: &'a str,
    pub refresh_token: Option<&'a str>,
    pub scopes: &'a BTreeSet<String>,
    pub expires: DateTime<Utc>,
}

pub fn insert_token(conn: &Connection, token: &NewToken<'_>) -> Result<OAuth2Token> {
    conn.execute(
        "INSERT INTO oauth2_tokens
             (client_id, user_id, token_type, access_token, refresh_token, scopes, expires)
         VALUES (?1, ?2, 'Bearer', ?3, ?4, ?5, ?6)",
        params![
            token.client_id,
            token.user_id,
            token.access_token,
            token.refresh_token,
            join_scopes(token.scopes),
            token.expires.to_rfc3339(),
        ],
    )?;
    find_token(conn, token.access_token)?
        .ok_or_else(|| CatalogError::Other("stored token could not be read back".into()))
}

pub fn find_token(conn: &Connection, access_token: &str) -> Result<Option<OAuth2Token>> {
    let sql = format!(
        "SELECT {} FROM oauth2_tokens WHERE access_token = ?1",
        TOKEN_COLUMNS
    );
    Ok(conn.query_row(&sql, [access_token], token_from_row).optional()?)
}

pub fn find_by_refresh_token(conn: &Connection, refresh_token: &str) -> Result<Option<OAuth2Token>> {
    let sql = format!(
        "SELECT {} FROM oauth2_tokens WHERE refresh_token = ?1",
        TOKEN_COLUMNS
    );
    Ok(conn.query_row(&sql, [refresh_token], token_from_row).optional()?)
}

/// Delete token `id` if it still carries `refresh_token`. Returns whether a
/// row went away; a refresh token can be consumed only once.
pub fn consume_refresh_token(conn: &Connection, id: i64, refresh_token: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM oauth2_tokens WHERE id = ?1 AND refresh_token = ?2",
        params![id, refresh_token],
    )?;
    Ok(removed == 1)
}

/// Delete the token whose access or refresh token is `token`.
pub fn revoke(conn: &Connection, token: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM oauth2_tokens WHERE access_token = ?1 OR refresh_token = ?1",
        [token],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::users::{insert, NewUser};
    use chrono::Duration;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        prism_catalog_core::init_sqlite_schema(&conn).unwrap();
        let user = insert(
            &conn,
            &NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                password_hash: "x".into(),
                ..NewUser::default()
            },
        )
        .unwrap();
        (conn, user.id)
    }

    #[test]
    fn test_client_round_trip() {
        let (conn, user_id) = setup();
        let scopes = parse_scopes("datasets:read users:read");
        let client = insert_client(
            &conn,
            "client-1",
            "secret-hash",
            user_id,
            &scopes,
            &["https://app.example.com/cb".to_string()],
        )
        .unwrap();
        assert_eq!(client.default_scopes, scopes);
        assert_eq!(client.redirect_uris.len(), 1);

        let (_, hash) = find_client(&conn, "client-1").unwrap().unwrap();
        assert_eq!(hash, "secret-hash");
        assert_eq!(list_clients(&conn, user_id, Page::default()).unwrap().len(), 1);
        assert!(list_clients(&conn, user_id + 1, Page::default()).unwrap().is_empty());
    }

    #[test]
    fn test_token_lookup_and_revoke() {
        let (conn, user_id) = setup();
        let scopes = parse_scopes("datasets:read");
        insert_client(&conn, "client-1", "h", user_id, &scopes, &[]).unwrap();

        let expires = Utc::now() + Duration::hours(1);
        let token = insert_token(
            &conn,
            &NewToken {
                client_id: "client-1",
                user_id,
                access_token: "access",
                refresh_token: Some("refresh"),
                scopes: &scopes,
                expires,
            },
        )
        .unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires.timestamp(), expires.timestamp());
        assert_eq!(
            find_by_refresh_token(&conn, "refresh").unwrap().unwrap().id,
            token.id
        );

        assert_eq!(revoke(&conn, "refresh").unwrap(), 1);
        assert_eq!(revoke(&conn, "refresh").unwrap(), 0);
        assert!(find_token(&conn, "access").unwrap().is_none());
    }

    #[test]
    fn test_refresh_token_is_consumed_once() {
        let (conn, user_id) = setup();
        let scopes = parse_scopes("datasets:read");
        insert_client(&conn, "client-1", "h", user_id, &scopes, &[]).unwrap();
        let token = insert_token(
            &conn,
            &NewToken {
                client_id: "client-1",
                user_id,
                access_token: "access",
                refresh_token: Some("refresh"),
                scopes: &scopes,
                expires: Utc::now() + Duration::hours(1),
            },
        )
        .unwrap();

        assert!(!consume_refresh_token(&conn, token.id, "other").unwrap());
        assert!(consume_refresh_token(&conn, token.id, "refresh").unwrap());
        assert!(!consume_refresh_token(&conn, token.id, "refresh").unwrap());
        assert!(find_token(&conn, "access").unwrap().is_none());
    }
}
