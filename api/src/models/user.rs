use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub username: String,
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
    pub is_archive: bool,
    pub created_at: NaiveDateTime,
}
