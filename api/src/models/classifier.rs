use diesel::prelude::*;
use serde::Serialize;

/// Trained user classifiers: feed, author, tag or title, each scored
/// -1 / 0 / +1, optionally scoped to a feed.
#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::classifiers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Classifier {
    pub id: i32,
    pub user_id: i32,
    pub kind: String,
    pub feed_id: Option<i32>,
    pub value: String,
    pub score: i32,
}

pub const KIND_FEED: &str = "feed";
pub const KIND_AUTHOR: &str = "author";
pub const KIND_TAG: &str = "tag";
pub const KIND_TITLE: &str = "title";
