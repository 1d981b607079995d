//! Stories: narratives built on top of one or more datasets
//!
//! A story's `type` selects an optional, type-specific `details` object.
//! General stories have no details; academic and news stories carry the
//! fields of [`AcademicDetails`] and [`NewsDetails`] respectively.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::patch::PatchSpec;
use crate::schema::{Field, FieldKind, Schema};
use crate::users::USER_SCHEMA;
use crate::{CatalogError, Owned, Result};

/// Kind of story, stored as its integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryType {
    General = 0,
    Academic = 1,
    News = 2,
}

impl StoryType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(StoryType::General),
            1 => Some(StoryType::Academic),
            2 => Some(StoryType::News),
            _ => None,
        }
    }

    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

impl std::fmt::Display for StoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoryType::General => write!(f, "general"),
            StoryType::Academic => write!(f, "academic"),
            StoryType::News => write!(f, "news"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcademicDetails {
    pub paper_name: String,
    #[serde(default)]
    pub paper_link: Option<String>,
    #[serde(default)]
    pub paper_authors: Option<String>,
    #[serde(default)]
    pub code_repo: Option<String>,
    #[serde(default)]
    pub paper_org: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsDetails {
    pub title: String,
    #[serde(default)]
    pub people: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Type-specific story details, stored as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoryDetails {
    Academic(AcademicDetails),
    News(NewsDetails),
}

impl StoryDetails {
    /// Parse a details payload for a story of `story_type`.
    ///
    /// Unknown types are rejected, as are details on a general story and
    /// payloads that do not match the type's fields.
    pub fn from_payload(story_type: i64, payload: Option<&Value>) -> Result<Option<Self>> {
        let kind = StoryType::from_i64(story_type)
            .ok_or_else(|| CatalogError::field("type", "unknown story type"))?;

        let payload = match payload {
            None | Some(Value::Null) => {
                return match kind {
                    StoryType::General => Ok(None),
                    _ => Err(CatalogError::field(
                        "details",
                        format!("{} stories require details", kind),
                    )),
                }
            }
            Some(value) => value.clone(),
        };

        let details = match kind {
            StoryType::General => {
                return Err(CatalogError::field(
                    "details",
                    "general stories carry no details",
                ))
            }
            StoryType::Academic => serde_json::from_value(payload).map(StoryDetails::Academic),
            StoryType::News => serde_json::from_value(payload).map(StoryDetails::News),
        };

        details
            .map(Some)
            .map_err(|e| CatalogError::field("details", e.to_string()))
    }

    pub fn story_type(&self) -> StoryType {
        match self {
            StoryDetails::Academic(_) => StoryType::Academic,
            StoryDetails::News(_) => StoryType::News,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub web: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Raw discriminant; see [`StoryType`]
    #[serde(rename = "type")]
    pub story_type: i64,
    pub stars: i64,
    pub keywords: Option<String>,
    pub issued_time: Option<String>,
    pub details: Option<StoryDetails>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
}

impl Owned for Story {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

// ============================================================================
// Schemas
// ============================================================================

pub static ACADEMIC_DETAILS_SCHEMA: Schema = Schema {
    name: "StoryAcademic",
    fields: &[
        Field::plain("paper_name"),
        Field::plain("paper_link"),
        Field::plain("paper_authors"),
        Field::plain("paper_org"),
        Field::plain("code_repo"),
    ],
};

pub static NEWS_DETAILS_SCHEMA: Schema = Schema {
    name: "StoryNews",
    fields: &[
        Field::plain("title"),
        Field::plain("people"),
        Field::plain("date"),
        Field::plain("location"),
        Field::plain("country"),
    ],
};

/// Details schema for a story type, if the type has details.
pub fn details_schema(story_type: i64) -> Option<&'static Schema> {
    match StoryType::from_i64(story_type)? {
        StoryType::Academic => Some(&ACADEMIC_DETAILS_SCHEMA),
        StoryType::News => Some(&NEWS_DETAILS_SCHEMA),
        StoryType::General => None,
    }
}

/// Project `details` through the schema selected by `type`. Types without a
/// details schema, including unknown ones, produce an empty object.
fn dump_story_details(source: &Value) -> Value {
    let schema = source
        .get("type")
        .and_then(Value::as_i64)
        .and_then(details_schema);

    match (schema, source.get("details")) {
        (Some(schema), Some(details)) if details.is_object() => schema.dump(details),
        _ => Value::Object(Map::new()),
    }
}

fn count_datasets(source: &Value) -> Value {
    Value::from(
        source
            .get("dataset_ids")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
    )
}

pub static STORY_SCHEMA: Schema = Schema {
    name: "Story",
    fields: &[
        Field::output("id"),
        Field::plain("title"),
        Field::plain("web"),
        Field::plain("description"),
        Field::plain("category"),
        Field::plain("type"),
        Field::output("stars"),
        Field::plain("keywords"),
        Field::plain("issued_time"),
        Field {
            name: "details",
            kind: FieldKind::Method(dump_story_details),
            dump_only: false,
        },
        Field::output("created"),
        Field::output("updated"),
        Field::nested("contributor", &USER_SCHEMA),
    ],
};

/// Counts only; expects linked dataset ids under `dataset_ids`.
pub static STORY_STAT_SCHEMA: Schema = Schema {
    name: "StoryStat",
    fields: &[
        Field::output("id"),
        Field::method("associated_datasets", count_datasets),
    ],
};

pub const STORY_PATCH: PatchSpec = PatchSpec::new(&[
    "title",
    "web",
    "description",
    "category",
    "keywords",
    "issued_time",
    "details",
]);
