//! JSON-Patch subset used by every update endpoint
//!
//! Only `replace` is supported, and only on top-level fields named in an
//! entity's allow-list ([`PatchSpec`]). Anything else is rejected before the
//! entity is touched, so a patch either applies completely or not at all.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CatalogError, Result};

pub const OP_REPLACE: &str = "replace";

/// One `{"op", "path", "value"}` entry of a patch document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl PatchOperation {
    pub fn replace(path: &str, value: Value) -> Self {
        PatchOperation {
            op: OP_REPLACE.to_string(),
            path: path.to_string(),
            value,
        }
    }

    /// Field addressed by the path, without the leading slash.
    pub fn field(&self) -> Option<&str> {
        let field = self.path.strip_prefix('/')?;
        if field.is_empty() || field.contains('/') {
            return None;
        }
        Some(field)
    }
}

/// Parse a request body into patch operations.
pub fn parse_operations(payload: &Value) -> Result<Vec<PatchOperation>> {
    if !payload.is_array() {
        return Err(CatalogError::field(
            "_schema",
            "A patch must be a list of operations.",
        ));
    }
    serde_json::from_value(payload.clone()).map_err(|e| CatalogError::field("_schema", e.to_string()))
}

/// Remove and return every operation addressing `field`.
///
/// Used for fields that need handling outside the generic apply, such as
/// passwords that are hashed rather than stored.
pub fn take_operations(ops: &mut Vec<PatchOperation>, field: &str) -> Vec<PatchOperation> {
    let (taken, kept): (Vec<_>, Vec<_>) = ops
        .drain(..)
        .partition(|op| op.field() == Some(field));
    *ops = kept;
    taken
}

/// The set of fields an entity allows to be replaced.
#[derive(Debug, Clone, Copy)]
pub struct PatchSpec {
    pub paths: &'static [&'static str],
}

impl PatchSpec {
    pub const fn new(paths: &'static [&'static str]) -> Self {
        PatchSpec { paths }
    }

    pub fn allows(&self, field: &str) -> bool {
        self.paths.contains(&field)
    }

    /// Check every operation without applying any.
    pub fn validate(&self, ops: &[PatchOperation]) -> Result<()> {
        for op in ops {
            self.target_field(op)?;
        }
        Ok(())
    }

    fn target_field<'a>(&self, op: &'a PatchOperation) -> Result<&'a str> {
        if op.op != OP_REPLACE {
            return Err(CatalogError::InvalidPatch(format!(
                "Operation \"{}\" is not supported",
                op.op
            )));
        }
        match op.field() {
            Some(field) if self.allows(field) => Ok(field),
            _ => Err(CatalogError::InvalidPatch(format!(
                "Path \"{}\" is not allowed",
                op.path
            ))),
        }
    }

    /// Apply `ops` to a copy of `target`.
    ///
    /// A value of the wrong type for its field is a validation failure on
    /// that field.
    pub fn apply<T>(&self, target: &T, ops: &[PatchOperation]) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.validate(ops)?;

        let mut current = serde_json::to_value(target)?;
        for op in ops {
            let field = self.target_field(op)?;
            let object = current
                .as_object_mut()
                .ok_or_else(|| CatalogError::InvalidPatch("target is not an object".into()))?;
            object.insert(field.to_string(), op.value.clone());

            serde_json::from_value::<T>(current.clone())
                .map_err(|e| CatalogError::field(field, e.to_string()))?;
        }

        serde_json::from_value(current).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        title: String,
        stars: i64,
        public: bool,
    }

    const NOTE_PATCH: PatchSpec = PatchSpec::new(&["title", "public"]);

    fn note() -> Note {
        Note {
            id: "n1".to_string(),
            title: "Old".to_string(),
            stars: 3,
            public: false,
        }
    }

    #[test]
    fn test_replace_allowed_field() {
        let ops = vec![PatchOperation::replace("/title", json!("New"))];
        let patched = NOTE_PATCH.apply(&note(), &ops).unwrap();
        assert_eq!(patched.title, "New");
        assert_eq!(patched.stars, 3);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let ops = vec![
            PatchOperation::replace("/title", json!("New")),
            PatchOperation::replace("/public", json!(true)),
        ];
        let once = NOTE_PATCH.apply(&note(), &ops).unwrap();
        let twice = NOTE_PATCH.apply(&once, &ops).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_disallowed_path_is_rejected() {
        let ops = vec![PatchOperation::replace("/stars", json!(1000))];
        let err = NOTE_PATCH.apply(&note(), &ops).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidPatch(_)));
    }

    #[test]
    fn test_nested_and_malformed_paths_are_rejected() {
        for path in ["title", "/", "/title/extra", ""] {
            let ops = vec![PatchOperation::replace(path, json!("x"))];
            assert!(
                NOTE_PATCH.validate(&ops).is_err(),
                "path {:?} should be rejected",
                path
            );
        }
    }

    #[test]
    fn test_unsupported_operation() {
        let ops = vec![PatchOperation {
            op: "remove".to_string(),
            path: "/title".to_string(),
            value: Value::Null,
        }];
        let err = NOTE_PATCH.validate(&ops).unwrap_err();
        assert!(err.to_string().contains("remove"));
    }

    #[test]
    fn test_no_partial_application() {
        let ops = vec![
            PatchOperation::replace("/title", json!("New")),
            PatchOperation::replace("/id", json!("forged")),
        ];
        assert!(NOTE_PATCH.apply(&note(), &ops).is_err());
    }

    #[test]
    fn test_type_mismatch_is_a_field_error() {
        let ops = vec![PatchOperation::replace("/public", json!("yes"))];
        match NOTE_PATCH.apply(&note(), &ops).unwrap_err() {
            CatalogError::InvalidFields(fields) => assert!(fields.contains_key("public")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_operations() {
        let ops = parse_operations(&json!([
            {"op": "replace", "path": "/title", "value": "X"}
        ]))
        .unwrap();
        assert_eq!(ops, vec![PatchOperation::replace("/title", json!("X"))]);

        assert!(parse_operations(&json!({"op": "replace"})).is_err());
        assert!(parse_operations(&json!([{"path": "/title"}])).is_err());
    }

    #[test]
    fn test_take_operations() {
        let mut ops = vec![
            PatchOperation::replace("/password", json!("secret")),
            PatchOperation::replace("/title", json!("X")),
        ];
        let taken = take_operations(&mut ops, "password");
        assert_eq!(taken.len(), 1);
        assert_eq!(ops, vec![PatchOperation::replace("/title", json!("X"))]);
    }
}
