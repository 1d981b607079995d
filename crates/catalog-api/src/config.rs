//! Server configuration and the OAuth2 scope registry
//!
//! ## Environment
//!
//! - `PRISM_DATABASE_PATH`: SQLite file (default: `prism_catalog.db`)
//! - `PRISM_PORT` / `PORT`: listen port (default: 8080)
//! - `PRISM_TOKEN_TTL_SECS`: lifetime of issued access tokens (default: 3600)
//! - `PRISM_TOKEN_LENGTH`: random bytes per issued token (default: 32)
//! - `PRISM_TOKEN_CACHE_TTL_SECS`: validator cache lifetime (default: 60)
//! - `PRISM_BCRYPT_COST`: bcrypt cost factor (default: 12, range: 4-31)
//! - `PRISM_PAGINATION_MAX_LIMIT`: largest accepted `limit` (default: 100)
//! - `PRISM_RECAPTCHA_PUBLIC_KEY`: served to the sign-up form

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use prism_catalog_core::validation::validate_scope;
use prism_catalog_core::{CatalogError, Result};

const DEFAULT_DATABASE_PATH: &str = "prism_catalog.db";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
const DEFAULT_TOKEN_LENGTH: usize = 32;
const DEFAULT_TOKEN_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_BCRYPT_COST: u32 = 12;
const DEFAULT_PAGINATION_MAX_LIMIT: i64 = 100;

/// Cheapest cost bcrypt accepts.
pub const BCRYPT_MIN_COST: u32 = 4;
pub const BCRYPT_MAX_COST: u32 = 31;

/// Default page size when the client sends no `limit`.
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Bring a configured bcrypt cost into the range bcrypt accepts.
pub fn clamp_bcrypt_cost(cost: u32) -> u32 {
    cost.clamp(BCRYPT_MIN_COST, BCRYPT_MAX_COST)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub database_path: PathBuf,
    pub port: u16,
    pub token_ttl_secs: i64,
    pub token_length: usize,
    pub token_cache_ttl: Duration,
    pub bcrypt_cost: u32,
    pub pagination_max_limit: i64,
    pub recaptcha_public_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            port: DEFAULT_PORT,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            token_length: DEFAULT_TOKEN_LENGTH,
            token_cache_ttl: Duration::from_secs(DEFAULT_TOKEN_CACHE_TTL_SECS),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            pagination_max_limit: DEFAULT_PAGINATION_MAX_LIMIT,
            recaptcha_public_key: None,
        }
    }
}

impl ApiConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("PRISM_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            port: env_parse("PRISM_PORT")
                .or_else(|| env_parse("PORT"))
                .unwrap_or(defaults.port),
            token_ttl_secs: env_parse("PRISM_TOKEN_TTL_SECS")
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.token_ttl_secs),
            token_length: env_parse("PRISM_TOKEN_LENGTH")
                .filter(|len: &usize| *len >= 16)
                .unwrap_or(defaults.token_length),
            token_cache_ttl: env_parse("PRISM_TOKEN_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.token_cache_ttl),
            bcrypt_cost: clamp_bcrypt_cost(
                env_parse("PRISM_BCRYPT_COST").unwrap_or(defaults.bcrypt_cost),
            ),
            pagination_max_limit: env_parse("PRISM_PAGINATION_MAX_LIMIT")
                .filter(|limit: &i64| *limit > 0)
                .unwrap_or(defaults.pagination_max_limit),
            recaptcha_public_key: std::env::var("PRISM_RECAPTCHA_PUBLIC_KEY").ok(),
        }
    }

    /// Configuration for a throwaway database, with the cheapest bcrypt cost.
    pub fn for_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            bcrypt_cost: BCRYPT_MIN_COST,
            ..Self::default()
        }
    }
}

/// Every OAuth2 scope the server knows about, with its description.
///
/// Built once at start-up from the declarations of each resource module and
/// shared read-only through [`crate::AppState`].
#[derive(Debug, Default, Clone)]
pub struct ScopeRegistry {
    scopes: BTreeMap<String, &'static str>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every scope declared by the resource modules.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        for (scope, description) in crate::resources::declared_scopes() {
            registry.register(scope, description)?;
        }
        Ok(registry)
    }

    /// Add a scope. Registering the same scope twice is an error.
    pub fn register(&mut self, scope: &str, description: &'static str) -> Result<()> {
        validate_scope(scope)?;
        if self.scopes.contains_key(scope) {
            return Err(CatalogError::ConflictError(format!(
                "OAuth2 scope '{}' is already registered",
                scope
            )));
        }
        self.scopes.insert(scope.to_string(), description);
        Ok(())
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.contains_key(scope)
    }

    pub fn description(&self, scope: &str) -> Option<&'static str> {
        self.scopes.get(scope).copied()
    }

    /// Scopes in `requested` that were never registered.
    pub fn unknown(&self, requested: &BTreeSet<String>) -> Vec<String> {
        requested
            .iter()
            .filter(|scope| !self.contains(scope))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
