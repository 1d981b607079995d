//! Comments on datasets and stories

use serde::{Deserialize, Serialize};

use crate::patch::PatchSpec;
use crate::schema::{Field, Schema};
use crate::Owned;

/// What a comment is attached to, stored as its integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentTarget {
    Dataset = 0,
    Story = 1,
}

impl CommentTarget {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(CommentTarget::Dataset),
            1 => Some(CommentTarget::Story),
            _ => None,
        }
    }

    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub comment: String,
    pub target_id: String,
    pub target_type: i64,
    pub user_id: Option<i64>,
    pub stars: i64,
    pub created: String,
    pub updated: String,
}

impl Comment {
    pub fn target(&self) -> Option<CommentTarget> {
        CommentTarget::from_i64(self.target_type)
    }
}

impl Owned for Comment {
    fn owner_id(&self) -> Option<i64> {
        self.user_id
    }
}

pub static COMMENT_SCHEMA: Schema = Schema {
    name: "Comment",
    fields: &[
        Field::plain("comment"),
        Field::output("id"),
        Field::output("created"),
        Field::output("updated"),
        Field::output("stars"),
        Field::output("user_id"),
        Field::output("target_id"),
        Field::output("target_type"),
    ],
};

pub const COMMENT_PATCH: PatchSpec = PatchSpec::new(&["comment"]);
