//! Request authorization pipeline
//!
//! Guarded handlers go through a fixed sequence of stages:
//!
//! ```text
//! UNAUTHENTICATED -> TOKEN_VALIDATED -> OBJECT_RESOLVED -> PERMISSION_CHECKED
//! ```
//!
//! Each stage is a separate type, so a handler cannot reach its target
//! entity without passing through authentication and authorization, and
//! cannot authorize before the target exists:
//!
//! ```ignore
//! let Authorized { principal, target } = Guard::login_required(&["datasets:write"])
//!     .permission(Permission::Owner)
//!     .authenticate(&state, &token)
//!     .await?
//!     .resolve::<Dataset>(&state, "dataset_id", &mut params)
//!     .await?
//!     .authorize(&state)?;
//! ```
//!
//! Permissions are evaluated in the order they were added and the first one
//! that fails ends the request with 403 and that permission's description.

use std::collections::HashMap;

use prism_catalog_core::users::{StaticRole, User};
use prism_catalog_core::{CatalogError, Owned};
use tracing::debug;

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::extract::BearerToken;
use crate::store::{self, Entity};
use crate::AppState;

/// Decides whether a principal may write. Consulted by
/// [`Permission::WriteAccess`].
pub trait WriteAccessPolicy: Send + Sync {
    fn allows_write(&self, user: &User, target: Option<&dyn Owned>) -> bool;
}

/// Grants write access to everyone who got this far.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllWrites;

impl WriteAccessPolicy for AllowAllWrites {
    fn allows_write(&self, _user: &User, _target: Option<&dyn Owned>) -> bool {
        true
    }
}

/// A single access predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// The principal holds a static role
    Role(StaticRole),
    /// The principal owns the resolved target, or administers the catalog
    Owner,
    /// The write-access policy agrees
    WriteAccess,
}

impl Permission {
    pub fn description(self) -> &'static str {
        match self {
            Permission::Role(StaticRole::Active) => "At least Active user is required.",
            Permission::Role(StaticRole::Admin) => "Admin user is required.",
            Permission::Role(StaticRole::Internal) => "Internal user is required.",
            Permission::Role(StaticRole::RegularUser) => "Regular user is required.",
            Permission::Owner => "Owner or Admin user is required.",
            Permission::WriteAccess => "Requires write access.",
        }
    }

    pub fn is_role(self) -> bool {
        matches!(self, Permission::Role(_))
    }

    pub fn check(
        self,
        user: &User,
        target: Option<&dyn Owned>,
        policy: &dyn WriteAccessPolicy,
    ) -> bool {
        match self {
            Permission::Role(StaticRole::Active) => user.is_active(),
            Permission::Role(StaticRole::Admin) => {
                user.is_internal() || (user.is_admin() && user.is_active())
            }
            Permission::Role(StaticRole::Internal) => user.is_internal(),
            Permission::Role(StaticRole::RegularUser) => user.is_regular_user(),
            Permission::Owner => match target {
                None => true,
                Some(target) => {
                    user.is_internal()
                        || (user.is_active()
                            && (user.is_admin() || target.owner_id() == Some(user.id)))
                }
            },
            Permission::WriteAccess => policy.allows_write(user, target),
        }
    }
}

/// The access requirements of one endpoint: the token scopes it needs and
/// an ordered list of permissions.
#[derive(Debug, Clone)]
pub struct Guard {
    scopes: Vec<&'static str>,
    permissions: Vec<Permission>,
    implicit_role: bool,
}

impl Guard {
    /// Require a valid token with `scopes`. An active account is implied
    /// until an explicit role permission is added.
    pub fn login_required(scopes: &[&'static str]) -> Self {
        Guard {
            scopes: scopes.to_vec(),
            permissions: vec![Permission::Role(StaticRole::Active)],
            implicit_role: true,
        }
    }

    /// Add a permission. Permissions already present are not added twice.
    pub fn permission(mut self, permission: Permission) -> Self {
        if permission.is_role() && self.implicit_role {
            self.permissions.clear();
            self.implicit_role = false;
        }
        if !self.permissions.contains(&permission) {
            self.permissions.push(permission);
        }
        self
    }

    pub fn scopes(&self) -> &[&'static str] {
        &self.scopes
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Descriptions of every permission, in evaluation order.
    pub fn describe(&self) -> Vec<&'static str> {
        self.permissions.iter().map(|p| p.description()).collect()
    }

    fn first_denied(
        &self,
        user: &User,
        target: Option<&dyn Owned>,
        policy: &dyn WriteAccessPolicy,
    ) -> Option<Permission> {
        self.permissions
            .iter()
            .copied()
            .find(|permission| !permission.check(user, target, policy))
    }

    fn enforce(&self, state: &AppState, user: &User, target: Option<&dyn Owned>) -> ApiResult<()> {
        match self.first_denied(user, target, state.write_policy.as_ref()) {
            None => Ok(()),
            Some(permission) => {
                debug!(
                    user_id = user.id,
                    denied = permission.description(),
                    requires = ?self.describe(),
                    "Permission check failed"
                );
                Err(ApiError::Forbidden(permission.description().to_string()))
            }
        }
    }

    /// Validate the bearer token against this guard's scopes.
    pub async fn authenticate(self, state: &AppState, token: &BearerToken) -> ApiResult<Authenticated> {
        let principal = state.tokens.validate(&token.0, &self.scopes).await?;
        debug!(user_id = principal.user.id, "Request authenticated");
        Ok(Authenticated {
            principal,
            guard: self,
        })
    }
}

/// A request whose token has been validated.
#[derive(Debug)]
pub struct Authenticated {
    pub principal: Principal,
    guard: Guard,
}

impl Authenticated {
    /// Remove `key` from the path parameters and load the entity it names.
    /// A missing entity is a 404 carrying the attempted id.
    pub async fn resolve<T>(
        self,
        state: &AppState,
        key: &str,
        params: &mut HashMap<String, String>,
    ) -> ApiResult<Resolved<T>>
    where
        T: Entity + Owned,
    {
        let id = params
            .remove(key)
            .ok_or_else(|| ApiError::BadRequest(format!("Missing path parameter \"{}\"", key)))?;

        let lookup = id.clone();
        let target = state
            .db
            .read(move |conn| Ok(store::find::<T>(conn, &lookup)?))
            .await?
            .ok_or_else(|| ApiError::from(CatalogError::not_found(T::KIND, &id)))?;

        debug!(kind = T::KIND, id = %id, "Object resolved");
        Ok(Resolved {
            principal: self.principal,
            target,
            guard: self.guard,
        })
    }

    /// Check the guard's permissions for a route without a target entity.
    pub fn authorize(self, state: &AppState) -> ApiResult<Principal> {
        self.guard.enforce(state, &self.principal.user, None)?;
        Ok(self.principal)
    }
}

/// A request with its target entity loaded.
#[derive(Debug)]
pub struct Resolved<T> {
    pub principal: Principal,
    pub target: T,
    guard: Guard,
}

impl<T: Owned> Resolved<T> {
    pub fn authorize(self, state: &AppState) -> ApiResult<Authorized<T>> {
        self.guard
            .enforce(state, &self.principal.user, Some(&self.target))?;
        Ok(Authorized {
            principal: self.principal,
            target: self.target,
        })
    }
}

/// A request that passed every permission for its target.
#[derive(Debug)]
pub struct Authorized<T> {
    pub principal: Principal,
    pub target: T,
}
