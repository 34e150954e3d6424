use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::briefings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Briefing {
    pub id: i32,
    pub user_id: i32,
    pub briefing_feed_id: i32,
    pub briefing_date: NaiveDateTime,
    pub period_start: NaiveDateTime,
    pub generated_at: NaiveDateTime,
    pub status: String,
    /// Ordered list of curated story hashes (jsonb array of strings).
    pub curated_story_hashes: serde_json::Value,
    /// Map of section key -> ordered list of story hashes.
    pub curated_sections: serde_json::Value,
    /// Map of section key -> HTML block.
    pub section_summaries: serde_json::Value,
    pub summary_story_hash: Option<String>,
    pub model: Option<String>,
    pub input_tokens: i32,
    pub output_tokens: i32,
}

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_FAILED: &str = "failed";

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::briefings)]
pub struct NewBriefing {
    pub user_id: i32,
    pub briefing_feed_id: i32,
    pub briefing_date: NaiveDateTime,
    pub period_start: NaiveDateTime,
    pub generated_at: NaiveDateTime,
    pub status: String,
    pub curated_story_hashes: serde_json::Value,
    pub curated_sections: serde_json::Value,
    pub section_summaries: serde_json::Value,
    pub summary_story_hash: Option<String>,
    pub model: Option<String>,
    pub input_tokens: i32,
    pub output_tokens: i32,
}

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::briefing_preferences)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BriefingPreferencesRow {
    pub user_id: i32,
    pub enabled: bool,
    pub frequency: String,
    pub preferred_hour: Option<i32>,
    pub story_count: i32,
    pub summary_length: String,
    pub summary_style: String,
    /// Map of section key -> bool (jsonb).
    pub sections: serde_json::Value,
    /// Array of custom keyword prompts, at most five (jsonb).
    pub custom_section_prompts: serde_json::Value,
    pub briefing_model: Option<String>,
    pub story_sources: String,
    pub read_filter: String,
    pub briefing_feed_id: Option<i32>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::briefing_preferences)]
pub struct NewBriefingPreferences {
    pub user_id: i32,
    pub enabled: bool,
    pub frequency: String,
    pub preferred_hour: Option<i32>,
    pub story_count: i32,
    pub summary_length: String,
    pub summary_style: String,
    pub sections: serde_json::Value,
    pub custom_section_prompts: serde_json::Value,
    pub briefing_model: Option<String>,
    pub story_sources: String,
    pub read_filter: String,
    pub briefing_feed_id: Option<i32>,
    pub updated_at: NaiveDateTime,
}
