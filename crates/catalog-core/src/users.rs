//! Principals and their static roles
//!
//! A user's roles live in a single integer bitmask. Each bit is independent:
//! an administrator who is not also `Active` cannot log in, and an internal
//! service account does not need the regular-user bit.

use serde::{Deserialize, Serialize};

use crate::patch::PatchSpec;
use crate::schema::{Field, Schema};
use crate::Owned;

/// One of the fixed, bitmask-encoded roles a principal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticRole {
    /// Service accounts operated by the catalog itself
    Internal,
    /// Catalog administrators
    Admin,
    /// Ordinary registered users
    RegularUser,
    /// Account is enabled; gates login
    Active,
}

impl StaticRole {
    pub const ALL: [StaticRole; 4] = [
        StaticRole::Internal,
        StaticRole::Admin,
        StaticRole::RegularUser,
        StaticRole::Active,
    ];

    /// Bit occupied by this role in [`StaticRoles`].
    pub const fn mask(self) -> i64 {
        match self {
            StaticRole::Internal => 0x8000,
            StaticRole::Admin => 0x4000,
            StaticRole::RegularUser => 0x2000,
            StaticRole::Active => 0x1000,
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            StaticRole::Internal => "Internal",
            StaticRole::Admin => "Admin",
            StaticRole::RegularUser => "Regular User",
            StaticRole::Active => "Active Account",
        }
    }
}

impl std::fmt::Display for StaticRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// Bitmask of [`StaticRole`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticRoles(i64);

impl StaticRoles {
    pub const fn empty() -> Self {
        StaticRoles(0)
    }

    /// Build from a stored bitmask. Unknown bits are preserved.
    pub const fn from_bits(bits: i64) -> Self {
        StaticRoles(bits)
    }

    pub const fn bits(self) -> i64 {
        self.0
    }

    pub const fn has(self, role: StaticRole) -> bool {
        self.0 & role.mask() != 0
    }

    pub fn set(&mut self, role: StaticRole) {
        self.0 |= role.mask();
    }

    pub fn unset(&mut self, role: StaticRole) {
        self.0 &= !role.mask();
    }

    /// Set or clear `role` depending on `enabled`.
    pub fn assign(&mut self, role: StaticRole, enabled: bool) {
        if enabled {
            self.set(role)
        } else {
            self.unset(role)
        }
    }

    #[must_use]
    pub fn with(mut self, role: StaticRole) -> Self {
        self.set(role);
        self
    }

    /// Roles given to a freshly registered account.
    pub fn new_account() -> Self {
        StaticRoles::empty()
            .with(StaticRole::Active)
            .with(StaticRole::RegularUser)
    }

    pub fn iter(self) -> impl Iterator<Item = StaticRole> {
        StaticRole::ALL.into_iter().filter(move |role| self.has(*role))
    }
}

/// A registered principal.
///
/// The password hash is intentionally not part of this type; it is read and
/// written by the credential store only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "UserRecord", into = "UserRecord")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub organization: Option<String>,
    pub github: Option<String>,
    pub country: Option<String>,
    pub bio: Option<String>,
    pub followers: i64,
    pub following: i64,
    pub created: String,
    pub updated: String,
    pub static_roles: StaticRoles,
}

impl User {
    pub fn is_internal(&self) -> bool {
        self.static_roles.has(StaticRole::Internal)
    }

    pub fn is_admin(&self) -> bool {
        self.static_roles.has(StaticRole::Admin)
    }

    pub fn is_regular_user(&self) -> bool {
        self.static_roles.has(StaticRole::RegularUser)
    }

    pub fn is_active(&self) -> bool {
        self.static_roles.has(StaticRole::Active)
    }

    pub fn set_is_internal(&mut self, value: bool) {
        self.static_roles.assign(StaticRole::Internal, value);
    }

    pub fn set_is_admin(&mut self, value: bool) {
        self.static_roles.assign(StaticRole::Admin, value);
    }

    pub fn set_is_regular_user(&mut self, value: bool) {
        self.static_roles.assign(StaticRole::RegularUser, value);
    }

    pub fn set_is_active(&mut self, value: bool) {
        self.static_roles.assign(StaticRole::Active, value);
    }

    /// Whether `self` is the principal `user`.
    pub fn check_owner(&self, user: &User) -> bool {
        self.id == user.id
    }
}

impl Owned for User {
    fn owner_id(&self) -> Option<i64> {
        Some(self.id)
    }
}

/// Wire shape of a [`User`]: the bitmask is expanded into one boolean per
/// role so schemas and patches can address them by name.
#[derive(Serialize, Deserialize)]
struct UserRecord {
    id: i64,
    username: String,
    email: String,
    first_name: String,
    middle_name: String,
    last_name: String,
    organization: Option<String>,
    github: Option<String>,
    country: Option<String>,
    bio: Option<String>,
    followers: i64,
    following: i64,
    created: String,
    updated: String,
    is_internal: bool,
    is_admin: bool,
    is_regular_user: bool,
    is_active: bool,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        let mut roles = StaticRoles::empty();
        roles.assign(StaticRole::Internal, record.is_internal);
        roles.assign(StaticRole::Admin, record.is_admin);
        roles.assign(StaticRole::RegularUser, record.is_regular_user);
        roles.assign(StaticRole::Active, record.is_active);

        User {
            id: record.id,
            username: record.username,
            email: record.email,
            first_name: record.first_name,
            middle_name: record.middle_name,
            last_name: record.last_name,
            organization: record.organization,
            github: record.github,
            country: record.country,
            bio: record.bio,
            followers: record.followers,
            following: record.following,
            created: record.created,
            updated: record.updated,
            static_roles: roles,
        }
    }
}

impl From<User> for UserRecord {
    fn from(user: User) -> Self {
        UserRecord {
            is_internal: user.is_internal(),
            is_admin: user.is_admin(),
            is_regular_user: user.is_regular_user(),
            is_active: user.is_active(),
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            middle_name: user.middle_name,
            last_name: user.last_name,
            organization: user.organization,
            github: user.github,
            country: user.country,
            bio: user.bio,
            followers: user.followers,
            following: user.following,
            created: user.created,
            updated: user.updated,
        }
    }
}

/// Output projection of a user. Role booleans are visible but only an
/// administrator can change them.
pub static USER_SCHEMA: Schema = Schema {
    name: "User",
    fields: &[
        Field::output("id"),
        Field::plain("username"),
        Field::plain("email"),
        Field::plain("first_name"),
        Field::plain("middle_name"),
        Field::plain("last_name"),
        Field::plain("organization"),
        Field::plain("github"),
        Field::plain("country"),
        Field::plain("bio"),
        Field::output("followers"),
        Field::output("following"),
        Field::output("created"),
        Field::output("is_active"),
        Field::output("is_regular_user"),
        Field::output("is_admin"),
    ],
};

/// Role fields settable through a user patch.
pub const ROLE_PATCH_FIELDS: [&str; 3] = ["is_active", "is_regular_user", "is_admin"];

pub const USER_PATCH: PatchSpec = PatchSpec::new(&[
    "first_name",
    "middle_name",
    "last_name",
    "email",
    "bio",
    "organization",
    "country",
    "github",
    "password",
    "is_active",
    "is_regular_user",
    "is_admin",
]);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            first_name: "Alice".to_string(),
            middle_name: String::new(),
            last_name: "Liddell".to_string(),
            organization: None,
            github: None,
            country: Some("UK".to_string()),
            bio: None,
            followers: 0,
            following: 0,
            created: "2024-01-01T00:00:00Z".to_string(),
            updated: "2024-01-01T00:00:00Z".to_string(),
            static_roles: StaticRoles::new_account(),
        }
    }

    #[test]
    fn test_role_masks() {
        assert_eq!(StaticRole::Internal.mask(), 0x8000);
        assert_eq!(StaticRole::Admin.mask(), 0x4000);
        assert_eq!(StaticRole::RegularUser.mask(), 0x2000);
        assert_eq!(StaticRole::Active.mask(), 0x1000);
    }

    #[test]
    fn test_roles_are_independent() {
        let mut roles = StaticRoles::empty();
        roles.set(StaticRole::Admin);
        assert!(roles.has(StaticRole::Admin));
        assert!(!roles.has(StaticRole::Active));

        roles.set(StaticRole::Active);
        roles.unset(StaticRole::Admin);
        assert!(!roles.has(StaticRole::Admin));
        assert!(roles.has(StaticRole::Active));
        assert_eq!(roles.bits(), 0x1000);
    }

    #[test]
    fn test_unknown_bits_survive() {
        let mut roles = StaticRoles::from_bits(0x1001);
        roles.set(StaticRole::Admin);
        assert_eq!(roles.bits(), 0x5001);
        assert_eq!(
            roles.iter().collect::<Vec<_>>(),
            vec![StaticRole::Admin, StaticRole::Active]
        );
    }

    #[test]
    fn test_new_account_roles() {
        let user = sample_user();
        assert!(user.is_active());
        assert!(user.is_regular_user());
        assert!(!user.is_admin());
        assert!(!user.is_internal());
    }

    #[test]
    fn test_setters() {
        let mut user = sample_user();
        user.set_is_admin(true);
        user.set_is_active(false);
        assert!(user.is_admin());
        assert!(!user.is_active());
        assert!(user.is_regular_user());
    }

    #[test]
    fn test_serialized_roles_round_trip() {
        let mut user = sample_user();
        user.set_is_admin(true);

        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["is_admin"], true);
        assert_eq!(value["is_active"], true);
        assert_eq!(value["is_internal"], false);
        assert!(value.get("static_roles").is_none());

        let back: User = serde_json::from_value(value).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_check_owner() {
        let alice = sample_user();
        let mut bob = sample_user();
        bob.id = 8;
        assert!(alice.check_owner(&alice));
        assert!(!alice.check_owner(&bob));
        assert_eq!(alice.owner_id(), Some(7));
    }

    #[test]
    fn test_schema_hides_internal_role() {
        let mut user = sample_user();
        user.set_is_internal(true);
        let out = USER_SCHEMA.serialize(&user).unwrap();
        assert!(out.get("is_internal").is_none());
        assert_eq!(out["is_active"], true);
        assert_eq!(out["username"], "alice");
    }

    #[test]
    fn test_role_fields_are_output_only() {
        for field in ROLE_PATCH_FIELDS {
            assert!(USER_SCHEMA.is_dump_only(field));
            assert!(USER_PATCH.allows(field));
        }
    }
}
