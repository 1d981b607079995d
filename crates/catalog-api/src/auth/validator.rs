//! Bearer token validation
//!
//! A token is accepted when it exists, has not reached its expiry instant,
//! carries every scope the endpoint requires, and belongs to an active user.
//! Every failure produces the same 401; the failing stage is only logged.
//!
//! ## Caching
//!
//! Token records are cached for a short TTL to spare a lookup per request.
//! The cache is keyed by a hash of the raw token, never the token itself.
//! Expiry and scopes are re-checked on every hit, and the user is always
//! loaded fresh so role changes apply immediately. Revoking any token
//! clears the whole cache and bumps a generation counter; a lookup that
//! read the database before the bump does not repopulate the cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use prism_catalog_core::auth::OAuth2Token;
use prism_catalog_core::users::User;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{ApiError, ApiResult};
use crate::store;

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub scopes: BTreeSet<String>,
}

/// Why a token was turned away. Logged, never returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingToken,
    UnknownToken,
    Expired,
    MissingScopes(Vec<String>),
    UnknownUser,
    InactiveUser,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingToken => write!(f, "missing bearer token"),
            Rejection::UnknownToken => write!(f, "unknown token"),
            Rejection::Expired => write!(f, "token expired"),
            Rejection::MissingScopes(scopes) => write!(f, "missing scopes: {}", scopes.join(" ")),
            Rejection::UnknownUser => write!(f, "token owner no longer exists"),
            Rejection::InactiveUser => write!(f, "token owner is not active"),
        }
    }
}

impl Rejection {
    /// Short metric label for the failing stage.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::MissingToken => "missing_token",
            Rejection::UnknownToken => "unknown_token",
            Rejection::Expired => "expired",
            Rejection::MissingScopes(_) => "missing_scopes",
            Rejection::UnknownUser => "unknown_user",
            Rejection::InactiveUser => "inactive_user",
        }
    }
}

/// Log the rejection and turn it into the generic 401.
pub fn reject(rejection: Rejection) -> ApiError {
    warn!(stage = %rejection, "Token validation failed");
    crate::record_rejection(rejection.label());
    ApiError::Unauthenticated
}

#[derive(Clone, Debug)]
struct CachedToken {
    user_id: i64,
    scopes: BTreeSet<String>,
    expires: DateTime<Utc>,
    cached_at: Instant,
}

impl From<&OAuth2Token> for CachedToken {
    fn from(token: &OAuth2Token) -> Self {
        CachedToken {
            user_id: token.user_id,
            scopes: token.scopes.clone(),
            expires: token.expires,
            cached_at: Instant::now(),
        }
    }
}

/// Expiry and scope checks for a token record.
pub fn check_grant(
    expires: DateTime<Utc>,
    granted: &BTreeSet<String>,
    now: DateTime<Utc>,
    required: &[&str],
) -> Result<(), Rejection> {
    if now >= expires {
        return Err(Rejection::Expired);
    }
    let missing: Vec<String> = required
        .iter()
        .filter(|scope| !granted.contains(**scope))
        .map(|scope| scope.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Rejection::MissingScopes(missing));
    }
    Ok(())
}

fn cache_key(raw: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}

pub struct TokenValidator {
    db: Database,
    cache: DashMap<u64, CachedToken>,
    cache_ttl: Duration,
    generation: AtomicU64,
}

impl TokenValidator {
    pub fn new(db: Database, cache_ttl: Duration) -> Self {
        Self {
            db,
            cache: DashMap::new(),
            cache_ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Validate `raw` against the scopes an endpoint requires.
    pub async fn validate(&self, raw: &str, required: &[&str]) -> ApiResult<Principal> {
        let token = self.lookup(raw).await?.ok_or_else(|| reject(Rejection::UnknownToken))?;

        if let Err(rejection) = check_grant(token.expires, &token.scopes, Utc::now(), required) {
            if rejection == Rejection::Expired {
                self.cache.remove(&cache_key(raw));
            }
            return Err(reject(rejection));
        }

        let user_id = token.user_id;
        let user = self
            .db
            .read(move |conn| Ok(store::users::find_by_id(conn, user_id)?))
            .await?
            .ok_or_else(|| reject(Rejection::UnknownUser))?;
        if !user.is_active() {
            return Err(reject(Rejection::InactiveUser));
        }

        debug!(user_id = user.id, "Token validated");
        Ok(Principal {
            user,
            scopes: token.scopes,
        })
    }

    async fn lookup(&self, raw: &str) -> ApiResult<Option<CachedToken>> {
        let key = cache_key(raw);

        let hit = self.cache.get(&key).map(|entry| entry.value().clone());
        if let Some(cached) = hit {
            if cached.cached_at.elapsed() < self.cache_ttl {
                debug!("Token validation: cache hit");
                return Ok(Some(cached));
            }
            debug!("Token validation: cache expired");
            self.cache.remove(&key);
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let access_token = raw.to_string();
        let stored = self
            .db
            .read(move |conn| Ok(store::auth::find_token(conn, &access_token)?))
            .await?;

        Ok(stored.map(|token| {
            let cached = CachedToken::from(&token);
            self.remember(key, cached.clone(), seen);
            cached
        }))
    }

    /// Cache a record read while the cache was at generation `seen`.
    /// Dropped again if a clear happened in between.
    fn remember(&self, key: u64, cached: CachedToken, seen: u64) {
        self.cache.insert(key, cached);
        if self.generation.load(Ordering::SeqCst) != seen {
            self.cache.remove(&key);
            debug!("Token cache cleared during lookup; entry discarded");
        }
    }

    /// Forget every cached token.
    pub fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.clear();
        debug!("Cleared token cache");
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
