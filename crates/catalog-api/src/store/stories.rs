//! Stories and their stars

use prism_catalog_core::stories::{Story, StoryDetails};
use prism_catalog_core::users::User;
use prism_catalog_core::{now_timestamp, Result};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{execute_unique, Entity, StarTable};

const STORY_STARS: StarTable = StarTable {
    link_table: "user_star_stories",
    target_column: "story_id",
    target_table: "stories",
};

/// Details are stored as JSON text. Text that no longer parses reads back
/// as no details rather than failing the whole row.
fn details_from_column(raw: Option<String>) -> Option<StoryDetails> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

fn details_to_column(details: &Option<StoryDetails>) -> Result<Option<String>> {
    details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

impl Entity for Story {
    const KIND: &'static str = "Story";
    const TABLE: &'static str = "stories";
    const COLUMNS: &'static str = "id, title, web, description, category, type, stars, keywords, \
         issued_time, details, contributor_id, created, updated";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Story {
            id: row.get(0)?,
            title: row.get(1)?,
            web: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            story_type: row.get(5)?,
            stars: row.get(6)?,
            keywords: row.get(7)?,
            issued_time: row.get(8)?,
            details: details_from_column(row.get(9)?),
            contributor_id: row.get(10)?,
            created: row.get(11)?,
            updated: row.get(12)?,
        })
    }
}

pub fn insert(conn: &Connection, story: &Story) -> Result<Story> {
    let now = now_timestamp();
    execute_unique(
        conn,
        "INSERT INTO stories (id, title, web, description, category, type, keywords,
             issued_time, details, contributor_id, created, updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            story.id,
            story.title,
            story.web,
            story.description,
            story.category,
            story.story_type,
            story.keywords,
            story.issued_time,
            details_to_column(&story.details)?,
            story.contributor_id,
            now,
        ],
        "A story with this title already exists",
    )?;
    super::get(conn, &story.id)
}

pub fn update(conn: &Connection, story: &Story) -> Result<Story> {
    execute_unique(
        conn,
        "UPDATE stories SET title = ?2, web = ?3, description = ?4, category = ?5,
             keywords = ?6, issued_time = ?7, details = ?8, updated = ?9
         WHERE id = ?1",
        params![
            story.id,
            story.title,
            story.web,
            story.description,
            story.category,
            story.keywords,
            story.issued_time,
            details_to_column(&story.details)?,
            now_timestamp(),
        ],
        "A story with this title already exists",
    )?;
    super::get(conn, &story.id)
}

pub fn add_star(conn: &Connection, user_id: i64, story_id: &str) -> Result<()> {
    super::add_star(conn, &STORY_STARS, user_id, story_id)
}

pub fn remove_star(conn: &Connection, user_id: i64, story_id: &str) -> Result<bool> {
    super::remove_star(conn, &STORY_STARS, user_id, story_id)
}

/// Ids of live datasets a story is linked to.
pub fn dataset_ids(conn: &Connection, story_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT l.dataset_id FROM dataset_stories l
         JOIN datasets d ON d.id = l.dataset_id
         WHERE l.story_id = ?1 AND d.deleted = 0
         ORDER BY l.created, l.dataset_id",
    )?;
    let ids = stmt
        .query_map([story_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Stories linked to a dataset.
pub fn linked_to(conn: &Connection, dataset_id: &str) -> Result<Vec<Story>> {
    let columns = Story::COLUMNS
        .split(',')
        .map(|column| format!("s.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM stories s JOIN dataset_stories l ON l.story_id = s.id
         WHERE l.dataset_id = ?1 ORDER BY l.created, s.id",
        columns
    );
    let mut stmt = conn.prepare(&sql)?;
    let stories = stmt
        .query_map([dataset_id], Story::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stories)
}

/// A story with its contributor and linked datasets, shaped for the story
/// schemas.
#[derive(Debug, Clone, Serialize)]
pub struct StoryView {
    #[serde(flatten)]
    pub story: Story,
    pub contributor: Option<User>,
    pub dataset_ids: Vec<String>,
}

pub fn view(conn: &Connection, story: Story) -> Result<StoryView> {
    let contributor = match story.contributor_id {
        Some(id) => super::users::find_by_id(conn, id)?,
        None => None,
    };
    Ok(StoryView {
        contributor,
        dataset_ids: dataset_ids(conn, &story.id)?,
        story,
    })
}

pub fn views(conn: &Connection, stories: Vec<Story>) -> Result<Vec<StoryView>> {
    stories.into_iter().map(|story| view(conn, story)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{self, users, Page};
    use prism_catalog_core::new_id;
    use prism_catalog_core::stories::{NewsDetails, STORY_SCHEMA};

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        prism_catalog_core::init_sqlite_schema(&conn).unwrap();
        let user = users::insert(
            &conn,
            &users::NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                password_hash: "x".into(),
                ..users::NewUser::default()
            },
        )
        .unwrap();
        (conn, user.id)
    }

    fn news(title: &str, contributor_id: i64) -> Story {
        Story {
            id: new_id(),
            title: title.to_string(),
            web: None,
            description: None,
            category: None,
            story_type: 2,
            stars: 0,
            keywords: None,
            issued_time: None,
            details: Some(StoryDetails::News(NewsDetails {
                title: "Floods".into(),
                people: None,
                date: None,
                location: Some("Delta".into()),
                country: None,
            })),
            contributor_id: Some(contributor_id),
            created: String::new(),
            updated: String::new(),
        }
    }

    #[test]
    fn test_details_survive_storage() {
        let (conn, uid) = setup();
        let story = insert(&conn, &news("Rising water", uid)).unwrap();
        let loaded = store::get::<Story>(&conn, &story.id).unwrap();
        assert_eq!(loaded.details, story.details);

        let out = STORY_SCHEMA.serialize(&view(&conn, loaded).unwrap()).unwrap();
        assert_eq!(out["details"]["location"], "Delta");
        assert_eq!(out["contributor"]["username"], "alice");
    }

    #[test]
    fn test_star_counter() {
        let (conn, uid) = setup();
        let story = insert(&conn, &news("Rising water", uid)).unwrap();
        add_star(&conn, uid, &story.id).unwrap();
        assert!(add_star(&conn, uid, &story.id).is_err());
        assert_eq!(store::get::<Story>(&conn, &story.id).unwrap().stars, 1);
        assert_eq!(store::list::<Story>(&conn, Page::default()).unwrap().len(), 1);
    }
}
