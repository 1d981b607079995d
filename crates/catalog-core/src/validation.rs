//! Input validation for the Prism catalog
//!
//! Single-value validators return [`CatalogError::ValidationError`] with a
//! human-readable message. Handlers gather them per field with
//! [`FieldValidator`], which produces the field → messages map carried by a
//! 422 response.

use crate::{CatalogError, FieldErrors, Result};

/// Maximum length for usernames
pub const MAX_USERNAME_LEN: usize = 80;

/// Maximum length for email addresses
pub const MAX_EMAIL_LEN: usize = 120;

/// Minimum length for passwords
pub const MIN_PASSWORD_LEN: usize = 6;

/// Maximum length for dataset names
pub const MAX_DATASET_NAME_LEN: usize = 128;

/// Maximum length for titles of datasets, stories and sources
pub const MAX_TITLE_LEN: usize = 512;

/// Maximum length for a comment body
pub const MAX_COMMENT_LEN: usize = 4096;

fn invalid(message: impl Into<String>) -> CatalogError {
    CatalogError::ValidationError(message.into())
}

/// Validate username
///
/// Requirements:
/// - Not empty
/// - <= 80 characters
/// - Alphanumeric, underscore, hyphen, dot only
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(invalid("Username cannot be empty"));
    }

    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(invalid(format!(
            "Username too long: {} > {} characters",
            username.chars().count(),
            MAX_USERNAME_LEN
        )));
    }

    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(invalid(
            "Username contains invalid characters (allowed: alphanumeric, _, -, .)",
        ));
    }

    Ok(())
}

/// Validate an email address: one `@`, non-empty local part, dotted domain.
pub fn validate_email(email: &str) -> Result<()> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(invalid(format!(
            "Email too long: {} > {} characters",
            email.len(),
            MAX_EMAIL_LEN
        )));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if !valid {
        return Err(invalid("Not a valid email address."));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Validate dataset name
///
/// Requirements:
/// - Not empty
/// - <= 128 characters
/// - Alphanumeric, underscore, hyphen, dot only
/// - Cannot start or end with hyphen
pub fn validate_dataset_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("Dataset name cannot be empty"));
    }

    if name.len() > MAX_DATASET_NAME_LEN {
        return Err(invalid(format!(
            "Dataset name too long: {} > {} characters",
            name.len(),
            MAX_DATASET_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(invalid(
            "Dataset name contains invalid characters (allowed: alphanumeric, _, -, .)",
        ));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("Dataset name cannot start or end with hyphen"));
    }

    Ok(())
}

/// Validate a free-text title: non-blank and bounded.
pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(invalid("Title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(invalid(format!(
            "Title too long: {} > {} characters",
            title.chars().count(),
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

pub fn validate_comment(comment: &str) -> Result<()> {
    if comment.trim().is_empty() {
        return Err(invalid("Comment cannot be empty"));
    }
    if comment.chars().count() > MAX_COMMENT_LEN {
        return Err(invalid(format!(
            "Comment too long: {} > {} characters",
            comment.chars().count(),
            MAX_COMMENT_LEN
        )));
    }
    Ok(())
}

/// Validate an OAuth2 scope name of the form `<resource>:<read|write>`.
pub fn validate_scope(scope: &str) -> Result<()> {
    let (resource, access) = scope
        .split_once(':')
        .ok_or_else(|| invalid(format!("Scope '{}' must look like <resource>:<access>", scope)))?;

    if resource.is_empty() || !resource.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return Err(invalid(format!("Scope '{}' has an invalid resource", scope)));
    }
    if access != "read" && access != "write" {
        return Err(invalid(format!(
            "Scope '{}' must end in :read or :write",
            scope
        )));
    }
    Ok(())
}

/// Validate pagination parameters.
pub fn validate_pagination(offset: i64, limit: i64, max_limit: i64) -> Result<()> {
    let mut validator = FieldValidator::new();
    if offset < 0 {
        validator.add("offset", "Must be greater than or equal to 0.");
    }
    if limit < 1 || limit > max_limit {
        validator.add(
            "limit",
            format!("Must be between 1 and {}.", max_limit),
        );
    }
    validator.finish()
}

/// Collects per-field validation messages.
#[derive(Debug, Default)]
pub struct FieldValidator {
    errors: FieldErrors,
}

impl FieldValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the outcome of a single-value validator against `field`.
    pub fn check(&mut self, field: &str, result: Result<()>) -> &mut Self {
        match result {
            Ok(()) => {}
            Err(CatalogError::InvalidFields(errors)) => {
                for (name, messages) in errors {
                    self.errors.entry(name).or_default().extend(messages);
                }
            }
            Err(CatalogError::ValidationError(message)) => {
                self.add(field, message);
            }
            Err(other) => {
                self.add(field, other.to_string());
            }
        }
        self
    }

    /// Require a non-empty value.
    pub fn require(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if value.map_or(true, |v| v.trim().is_empty()) {
            self.add(field, "Missing data for required field.");
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::InvalidFields(std::mem::take(&mut self.errors)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob_2").is_ok());
        assert!(validate_username("j.doe-x").is_ok());
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(validate_username("").is_err()); // Empty
        assert!(validate_username(&"a".repeat(81)).is_err()); // Too long
        assert!(validate_username("bad name").is_err()); // Space
        assert!(validate_username("root@host").is_err()); // @
    }

    #[test]
    fn test_emails() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.example.org").is_ok());

        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("alice@localhost").is_err());
        assert!(validate_email("a@b@c.com").is_err());
        assert!(validate_email("alice @example.com").is_err());
    }

    #[test]
    fn test_passwords() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_dataset_names() {
        assert!(validate_dataset_name("census_2020").is_ok());
        assert!(validate_dataset_name("my.dataset.v2").is_ok());
        assert!(validate_dataset_name("").is_err());
        assert!(validate_dataset_name(&"a".repeat(129)).is_err());
        assert!(validate_dataset_name("my dataset").is_err());
        assert!(validate_dataset_name("-dataset").is_err());
        assert!(validate_dataset_name("my/dataset").is_err());
    }

    #[test]
    fn test_titles_and_comments() {
        assert!(validate_title("Census").is_ok());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"t".repeat(513)).is_err());
        assert!(validate_comment("Looks good").is_ok());
        assert!(validate_comment("").is_err());
    }

    #[test]
    fn test_scopes() {
        assert!(validate_scope("datasets:read").is_ok());
        assert!(validate_scope("users:write").is_ok());
        assert!(validate_scope("datasets").is_err());
        assert!(validate_scope("datasets:delete").is_err());
        assert!(validate_scope(":read").is_err());
        assert!(validate_scope("Data Sets:read").is_err());
    }

    #[test]
    fn test_pagination_bounds() {
        assert!(validate_pagination(0, 20, 100).is_ok());
        assert!(validate_pagination(0, 100, 100).is_ok());

        match validate_pagination(-1, 0, 100).unwrap_err() {
            CatalogError::InvalidFields(fields) => {
                assert!(fields.contains_key("offset"));
                assert!(fields.contains_key("limit"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(validate_pagination(0, 101, 100).is_err());
    }

    #[test]
    fn test_field_validator_collects_messages() {
        let mut validator = FieldValidator::new();
        validator
            .require("username", Some(""))
            .check("email", validate_email("nope"))
            .check("password", validate_password("secret"));

        match validator.finish().unwrap_err() {
            CatalogError::InvalidFields(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(
                    fields["username"],
                    vec!["Missing data for required field.".to_string()]
                );
                assert!(fields.contains_key("email"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
