//! Declarative field-visibility schemas
//!
//! A [`Schema`] is a named, ordered list of fields. It is used in both
//! directions:
//!
//! - **Output** ([`Schema::dump`]): a serialized entity is projected onto
//!   exactly the declared fields, in declaration order. Nested fields are
//!   projected recursively through their own schema and method fields are
//!   computed from the whole source object.
//! - **Input** ([`Schema::load`]): output-only fields and undeclared fields
//!   are silently dropped from a client payload before it reaches any
//!   persistence code.
//!
//! Entities are serialized with `serde_json` first; the schema then works on
//! the resulting [`Value`]. Hidden columns (password hashes, soft-delete
//! flags, foreign keys that are exposed as nested objects) simply never
//! appear in a schema.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{CatalogError, Result};

/// Computes a field's output from the full serialized source object.
pub type Projection = fn(&Value) -> Value;

#[derive(Clone, Copy)]
pub enum FieldKind {
    /// Copied from the source field of the same name
    Plain,
    /// A single related entity, projected through its own schema
    Nested(&'static Schema),
    /// A list of related entities
    NestedMany(&'static Schema),
    /// Computed by a projection function
    Method(Projection),
}

impl std::fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Plain => write!(f, "Plain"),
            FieldKind::Nested(schema) => write!(f, "Nested({})", schema.name),
            FieldKind::NestedMany(schema) => write!(f, "NestedMany({})", schema.name),
            FieldKind::Method(_) => write!(f, "Method"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Never accepted on input
    pub dump_only: bool,
}

impl Field {
    /// A client-writable field.
    pub const fn plain(name: &'static str) -> Self {
        Field {
            name,
            kind: FieldKind::Plain,
            dump_only: false,
        }
    }

    /// A field that is only ever produced, never accepted.
    pub const fn output(name: &'static str) -> Self {
        Field {
            name,
            kind: FieldKind::Plain,
            dump_only: true,
        }
    }

    pub const fn nested(name: &'static str, schema: &'static Schema) -> Self {
        Field {
            name,
            kind: FieldKind::Nested(schema),
            dump_only: true,
        }
    }

    pub const fn nested_many(name: &'static str, schema: &'static Schema) -> Self {
        Field {
            name,
            kind: FieldKind::NestedMany(schema),
            dump_only: true,
        }
    }

    pub const fn method(name: &'static str, projection: Projection) -> Self {
        Field {
            name,
            kind: FieldKind::Method(projection),
            dump_only: true,
        }
    }

    fn project(&self, source: &Map<String, Value>, whole: &Value) -> Value {
        match self.kind {
            FieldKind::Plain => source.get(self.name).cloned().unwrap_or(Value::Null),
            FieldKind::Nested(schema) => match source.get(self.name) {
                Some(Value::Null) | None => Value::Null,
                Some(value) => schema.dump(value),
            },
            FieldKind::NestedMany(schema) => match source.get(self.name) {
                Some(Value::Array(items)) => {
                    Value::Array(items.iter().map(|item| schema.dump(item)).collect())
                }
                _ => Value::Array(Vec::new()),
            },
            FieldKind::Method(projection) => projection(whole),
        }
    }
}

/// A named, ordered field list.
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_dump_only(&self, name: &str) -> bool {
        self.field(name).map_or(false, |field| field.dump_only)
    }

    /// Names of fields a client may send.
    pub fn writable_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|field| !field.dump_only)
            .map(|field| field.name)
    }

    /// Project a serialized entity onto this schema.
    ///
    /// Arrays are projected element-wise; anything that is not an object
    /// projects to `null`.
    pub fn dump(&self, source: &Value) -> Value {
        match source {
            Value::Object(map) => {
                let mut out = Map::with_capacity(self.fields.len());
                for field in self.fields {
                    out.insert(field.name.to_string(), field.project(map, source));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|item| self.dump(item)).collect()),
            _ => Value::Null,
        }
    }

    /// Serialize `entity` and project it.
    pub fn serialize<T: Serialize + ?Sized>(&self, entity: &T) -> Result<Value> {
        Ok(self.dump(&serde_json::to_value(entity)?))
    }

    /// Filter a client payload down to the writable declared fields.
    pub fn load(&self, payload: &Value) -> Result<Map<String, Value>> {
        let map = payload
            .as_object()
            .ok_or_else(|| CatalogError::field("_schema", "Invalid input type."))?;

        Ok(map
            .iter()
            .filter(|(key, _)| {
                self.field(key)
                    .map_or(false, |field| !field.dump_only)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static OWNER: Schema = Schema {
        name: "Owner",
        fields: &[Field::output("id"), Field::plain("username")],
    };

    fn count_tags(source: &Value) -> Value {
        json!(source["tags"].as_array().map_or(0, |tags| tags.len()))
    }

    static THING: Schema = Schema {
        name: "Thing",
        fields: &[
            Field::output("id"),
            Field::plain("title"),
            Field::nested("owner", &OWNER),
            Field::nested_many("members", &OWNER),
            Field::method("tag_count", count_tags),
        ],
    };

    #[test]
    fn test_dump_projects_declared_fields_in_order() {
        let source = json!({
            "title": "T",
            "id": "t1",
            "password": "secret",
            "owner": {"id": 1, "username": "alice", "password": "hash"},
            "members": [{"id": 2, "username": "bob", "email": "b@x"}],
            "tags": ["a", "b", "c"],
        });

        let out = THING.dump(&source);
        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["id", "title", "owner", "members", "tag_count"]);
        assert!(out.get("password").is_none());
        assert_eq!(out["owner"], json!({"id": 1, "username": "alice"}));
        assert_eq!(out["members"], json!([{"id": 2, "username": "bob"}]));
        assert_eq!(out["tag_count"], 3);
    }

    #[test]
    fn test_dump_missing_values() {
        let out = THING.dump(&json!({"id": "t1", "owner": null}));
        assert_eq!(out["title"], Value::Null);
        assert_eq!(out["owner"], Value::Null);
        assert_eq!(out["members"], json!([]));
        assert_eq!(out["tag_count"], 0);
    }

    #[test]
    fn test_dump_collection() {
        let out = OWNER.dump(&json!([{"id": 1, "username": "a", "x": 1}, {"id": 2}]));
        assert_eq!(
            out,
            json!([{"id": 1, "username": "a"}, {"id": 2, "username": null}])
        );
    }

    #[test]
    fn test_load_drops_output_only_and_unknown_fields() {
        let payload = json!({
            "id": "forged",
            "title": "New",
            "owner": {"id": 99},
            "tag_count": 100,
            "extra": true,
        });
        let loaded = THING.load(&payload).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["title"], "New");
    }

    #[test]
    fn test_load_rejects_non_objects() {
        assert!(THING.load(&json!(["title"])).is_err());
    }

    #[test]
    fn test_writable_fields() {
        assert_eq!(THING.writable_fields().collect::<Vec<_>>(), vec!["title"]);
        assert!(THING.is_dump_only("id"));
        assert!(!THING.is_dump_only("title"));
        assert!(!THING.is_dump_only("unknown"));
    }
}
