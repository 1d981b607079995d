//! Datasets and their provenance metadata
//!
//! Licenses, organizations and publishers are shared between datasets and
//! looked up by their unique name when a dataset is registered. Sources and
//! references belong to exactly one dataset.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::PatchSpec;
use crate::schema::{Field, Schema};
use crate::users::USER_SCHEMA;
use crate::Owned;

/// A catalogued dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// 32-character hex identifier
    pub id: String,
    /// Unique machine-friendly name
    pub name: String,
    pub title: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub version: Option<String>,
    /// Comma-separated keywords
    pub keywords: Option<String>,
    pub image: Option<String>,
    pub temporal: Option<String>,
    pub spatial: Option<String>,
    pub access_level: Option<String>,
    pub copyrights: Option<String>,
    pub accrual_periodicity: Option<String>,
    pub specification: Option<String>,
    pub data_quality: bool,
    pub data_dictionary: Option<String>,
    pub category: Option<String>,
    pub issued_time: Option<String>,
    pub language: Option<String>,
    /// Number of users who starred the dataset
    pub stars: i64,
    pub license_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub publisher_id: Option<String>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
    /// Soft-delete flag; deleted datasets are invisible to every lookup
    pub deleted: bool,
}

impl Owned for Dataset {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: i64,
    pub title: String,
    pub web: Option<String>,
    #[serde(rename = "type")]
    pub license_type: Option<String>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
}

impl Owned for License {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub web: Option<String>,
    pub country: Option<String>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
}

impl Owned for Organization {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

/// The original publisher of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: String,
    pub name: String,
    pub department: Option<String>,
    pub web: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub organization_id: Option<i64>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
}

impl Owned for Publisher {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

/// Where a dataset can be accessed or downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub dataset_id: Option<String>,
    pub title: String,
    pub access_url: String,
    pub download_url: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub format: String,
    pub media_type: String,
    pub schema: Option<String>,
    pub snapshot: Option<String>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
}

impl Source {
    /// Fill in `download_url` from `access_url` when the caller left it out.
    pub fn normalize_download_url(&mut self) {
        if self.download_url.as_deref().map_or(true, str::is_empty) {
            self.download_url = Some(self.access_url.clone());
        }
    }
}

impl Owned for Source {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

/// A publication or document citing a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub dataset_id: String,
    pub title: String,
    pub reference: String,
    pub snapshot: Option<String>,
    pub contributor_id: Option<i64>,
    pub created: String,
    pub updated: String,
}

impl Owned for Reference {
    fn owner_id(&self) -> Option<i64> {
        self.contributor_id
    }
}

// ============================================================================
// Schemas
// ============================================================================

fn count_stories(source: &Value) -> Value {
    Value::from(
        source
            .get("story_ids")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
    )
}

pub static LICENSE_SCHEMA: Schema = Schema {
    name: "License",
    fields: &[
        Field::output("id"),
        Field::plain("title"),
        Field::plain("web"),
        Field::plain("type"),
        Field::output("created"),
        Field::output("updated"),
    ],
};

pub static ORGANIZATION_SCHEMA: Schema = Schema {
    name: "Organization",
    fields: &[
        Field::output("id"),
        Field::plain("name"),
        Field::plain("email"),
        Field::plain("web"),
        Field::plain("country"),
        Field::output("created"),
        Field::output("updated"),
    ],
};

pub static PUBLISHER_SCHEMA: Schema = Schema {
    name: "Publisher",
    fields: &[
        Field::output("id"),
        Field::plain("name"),
        Field::plain("department"),
        Field::plain("web"),
        Field::plain("email"),
        Field::plain("role"),
        Field::output("created"),
        Field::output("updated"),
        Field::plain("organization_id"),
    ],
};

pub static REFERENCE_SCHEMA: Schema = Schema {
    name: "Reference",
    fields: &[
        Field::output("id"),
        Field::plain("dataset_id"),
        Field::plain("title"),
        Field::plain("reference"),
        Field::plain("snapshot"),
        Field::output("created"),
        Field::output("updated"),
    ],
};

pub static SOURCE_SCHEMA: Schema = Schema {
    name: "Source",
    fields: &[
        Field::output("id"),
        Field::plain("dataset_id"),
        Field::plain("title"),
        Field::plain("access_url"),
        Field::plain("download_url"),
        Field::plain("email"),
        Field::plain("description"),
        Field::plain("format"),
        Field::plain("media_type"),
        Field::plain("schema"),
        Field::output("created"),
        Field::output("updated"),
        Field::output("snapshot"),
    ],
};

/// Output projection of a dataset. Expects the serialized dataset to carry
/// its related entities under `contributor`, `license`, `organization`,
/// `publisher`, `sources`, `references` and the linked story ids under
/// `story_ids`.
pub static DATASET_SCHEMA: Schema = Schema {
    name: "Dataset",
    fields: &[
        Field::output("id"),
        Field::output("created"),
        Field::output("updated"),
        Field::output("stars"),
        Field::plain("name"),
        Field::plain("title"),
        Field::plain("description"),
        Field::plain("homepage"),
        Field::plain("version"),
        Field::plain("category"),
        Field::plain("issued_time"),
        Field::plain("keywords"),
        Field::plain("image"),
        Field::plain("temporal"),
        Field::plain("spatial"),
        Field::plain("access_level"),
        Field::plain("copyrights"),
        Field::plain("accrual_periodicity"),
        Field::plain("specification"),
        Field::plain("data_quality"),
        Field::plain("data_dictionary"),
        Field::plain("language"),
        Field::nested("contributor", &USER_SCHEMA),
        Field::nested("license", &LICENSE_SCHEMA),
        Field::nested("organization", &ORGANIZATION_SCHEMA),
        Field::nested("publisher", &PUBLISHER_SCHEMA),
        Field::nested_many("sources", &SOURCE_SCHEMA),
        Field::nested_many("references", &REFERENCE_SCHEMA),
        Field::method("story_count", count_stories),
    ],
};

pub const DATASET_PATCH: PatchSpec = PatchSpec::new(&[
    "name",
    "title",
    "description",
    "homepage",
    "version",
    "category",
    "issued_time",
    "keywords",
    "image",
    "temporal",
    "spatial",
    "access_level",
    "copyrights",
    "accrual_periodicity",
    "specification",
    "data_quality",
    "data_dictionary",
    "language",
    "license_id",
    "organization_id",
    "publisher_id",
]);

pub const LICENSE_PATCH: PatchSpec = PatchSpec::new(&["title", "web", "type"]);

pub const ORGANIZATION_PATCH: PatchSpec = PatchSpec::new(&["name", "email", "web", "country"]);

pub const PUBLISHER_PATCH: PatchSpec =
    PatchSpec::new(&["name", "department", "web", "email", "role", "organization_id"]);

pub const SOURCE_PATCH: PatchSpec = PatchSpec::new(&[
    "title",
    "access_url",
    "download_url",
    "email",
    "description",
    "format",
    "media_type",
    "schema",
]);

pub const REFERENCE_PATCH: PatchSpec = PatchSpec::new(&["title", "reference", "snapshot"]);
