use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::feeds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Feed {
    pub id: i32,
    pub feed_address: String,
    pub feed_link: Option<String>,
    pub feed_title: String,
    pub branch_from_feed: Option<i32>,
    pub favicon_data: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Feed {
    /// Branched feed copies resolve to their original; two feeds with the
    /// same original count as one source for clustering.
    pub fn resolved_id(&self) -> i32 {
        self.branch_from_feed.unwrap_or(self.id)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::feeds)]
pub struct NewFeed {
    pub feed_address: String,
    pub feed_link: Option<String>,
    pub feed_title: String,
    pub branch_from_feed: Option<i32>,
}

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::user_subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserSubscription {
    pub id: i32,
    pub user_id: i32,
    pub feed_id: i32,
    pub active: bool,
    pub needs_unread_recalc: bool,
    pub folder: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::user_subscriptions)]
pub struct NewUserSubscription {
    pub user_id: i32,
    pub feed_id: i32,
    pub active: bool,
    pub needs_unread_recalc: bool,
    pub folder: Option<String>,
}
