//! OAuth2 clients, grants and tokens
//!
//! Scopes are stored as a single space-separated string, as they travel in
//! the OAuth2 `scope` parameter.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{Field, Schema};
use crate::Owned;

/// Split a space-separated scope string into a set.
pub fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Join scopes into their stored, space-separated form.
pub fn join_scopes<'a, I>(scopes: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    scopes
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A registered OAuth2 client application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Client {
    pub client_id: String,
    pub user_id: i64,
    pub default_scopes: BTreeSet<String>,
    pub redirect_uris: Vec<String>,
    pub created: String,
}

impl OAuth2Client {
    /// Whether every scope in `requested` is among this client's defaults.
    pub fn allows_scopes(&self, requested: &BTreeSet<String>) -> bool {
        requested.is_subset(&self.default_scopes)
    }
}

impl Owned for OAuth2Client {
    fn owner_id(&self) -> Option<i64> {
        Some(self.user_id)
    }
}

/// An authorization-code grant. Stored, but no endpoint issues them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Grant {
    pub id: i64,
    pub user_id: i64,
    pub client_id: String,
    pub code: String,
    pub redirect_uri: String,
    pub scopes: BTreeSet<String>,
    pub expires: DateTime<Utc>,
}

/// An issued bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub id: i64,
    pub client_id: String,
    pub user_id: i64,
    pub token_type: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: BTreeSet<String>,
    pub expires: DateTime<Utc>,
}

impl OAuth2Token {
    /// A token is expired from its expiry instant onwards.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    /// Required scopes missing from the granted set, in request order.
    pub fn missing_scopes<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|scope| !self.scopes.contains(*scope))
            .collect()
    }
}

/// Output projection of a client. The secret is only ever returned once, by
/// the creation endpoint.
pub static CLIENT_SCHEMA: Schema = Schema {
    name: "OAuth2Client",
    fields: &[
        Field::output("client_id"),
        Field::output("user_id"),
        Field::plain("default_scopes"),
        Field::plain("redirect_uris"),
        Field::output("created"),
    ],
};
