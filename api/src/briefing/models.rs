//! Briefing records, per-user preferences and the synthetic briefing feed.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::models::briefing::{Briefing, NewBriefing, STATUS_COMPLETE};
use crate::models::feed::{Feed, NewFeed, NewUserSubscription};
use crate::models::story::NewStory;
use crate::models::user::User;
use crate::App;

pub const MAX_CUSTOM_SECTIONS: usize = 5;
/// The fallback section; disabled-section stories are remapped here and the
/// section processor always retains it.
pub const DEFAULT_SECTION: &str = "trending_global";

/// Every key a briefing section may use: the nine fixed sections plus the
/// five custom keyword slots.
pub const VALID_SECTION_KEYS: &[&str] = &[
    "trending_unread",
    "long_read",
    "classifier_match",
    "follow_up",
    "trending_global",
    "duplicates",
    "quick_catchup",
    "emerging_topics",
    "contrarian_views",
    "custom_1",
    "custom_2",
    "custom_3",
    "custom_4",
    "custom_5",
];

pub const FIXED_SECTION_KEYS: &[&str] = &[
    "trending_unread",
    "long_read",
    "classifier_match",
    "follow_up",
    "trending_global",
    "duplicates",
    "quick_catchup",
    "emerging_topics",
    "contrarian_views",
];

/// Fixed sections start enabled; custom slots start disabled.
pub fn default_sections() -> HashMap<String, bool> {
    VALID_SECTION_KEYS
        .iter()
        .map(|key| (key.to_string(), !key.starts_with("custom_")))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    TwiceDaily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::TwiceDaily => "twice_daily",
            Frequency::Weekly => "weekly",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Frequency::Daily),
            "twice_daily" => Some(Frequency::TwiceDaily),
            "weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }

    pub fn period(&self) -> chrono::Duration {
        match self {
            Frequency::Daily => chrono::Duration::hours(24),
            Frequency::TwiceDaily => chrono::Duration::hours(12),
            Frequency::Weekly => chrono::Duration::days(7),
        }
    }

    /// Minimum candidates required before a briefing is worth generating.
    pub fn min_stories(&self) -> usize {
        match self {
            Frequency::Daily | Frequency::Weekly => 3,
            Frequency::TwiceDaily => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Detailed,
}

impl SummaryLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryLength::Short => "short",
            SummaryLength::Medium => "medium",
            SummaryLength::Detailed => "detailed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "short" => Some(SummaryLength::Short),
            "medium" => Some(SummaryLength::Medium),
            "detailed" => Some(SummaryLength::Detailed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    Editorial,
    #[default]
    Bullets,
    Headlines,
}

impl SummaryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStyle::Editorial => "editorial",
            SummaryStyle::Bullets => "bullets",
            SummaryStyle::Headlines => "headlines",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "editorial" => Some(SummaryStyle::Editorial),
            "bullets" => Some(SummaryStyle::Bullets),
            "headlines" => Some(SummaryStyle::Headlines),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadFilter {
    All,
    #[default]
    Unread,
    Focus,
}

impl ReadFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadFilter::All => "all",
            ReadFilter::Unread => "unread",
            ReadFilter::Focus => "focus",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "all" => Some(ReadFilter::All),
            "unread" => Some(ReadFilter::Unread),
            "focus" => Some(ReadFilter::Focus),
            _ => None,
        }
    }
}

/// Typed view over the `briefing_preferences` row.
#[derive(Debug, Clone, Serialize)]
pub struct BriefingPrefs {
    pub user_id: i32,
    pub enabled: bool,
    pub frequency: Frequency,
    pub preferred_hour: Option<u32>,
    pub story_count: usize,
    pub summary_length: SummaryLength,
    pub summary_style: SummaryStyle,
    pub sections: HashMap<String, bool>,
    pub custom_section_prompts: Vec<String>,
    pub briefing_model: Option<String>,
    pub story_sources: String,
    pub read_filter: ReadFilter,
    pub briefing_feed_id: Option<i32>,
}

impl Default for BriefingPrefs {
    fn default() -> Self {
        Self {
            user_id: 0,
            enabled: false,
            frequency: Frequency::default(),
            preferred_hour: None,
            story_count: 5,
            summary_length: SummaryLength::default(),
            summary_style: SummaryStyle::default(),
            sections: default_sections(),
            custom_section_prompts: Vec::new(),
            briefing_model: None,
            story_sources: "all".to_string(),
            read_filter: ReadFilter::default(),
            briefing_feed_id: None,
        }
    }
}

impl BriefingPrefs {
    /// The folder name when story sources are scoped to `folder:<name>`.
    pub fn source_folder(&self) -> Option<&str> {
        self.story_sources.strip_prefix("folder:")
    }

    pub fn enabled_section_count(&self) -> usize {
        self.sections.values().filter(|enabled| **enabled).count()
    }
}

/// Drop section keys outside the valid set; values coerce to bool.
pub fn sanitize_sections(value: &serde_json::Value) -> HashMap<String, bool> {
    let mut sections = HashMap::new();
    if let Some(map) = value.as_object() {
        for (key, enabled) in map {
            if VALID_SECTION_KEYS.contains(&key.as_str()) {
                sections.insert(key.clone(), enabled.as_bool().unwrap_or(false));
            }
        }
    }
    sections
}

/// Trim custom prompts, filter empties, cap at the slot count.
pub fn sanitize_custom_prompts(prompts: &[String]) -> Vec<String> {
    prompts
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(MAX_CUSTOM_SECTIONS)
        .collect()
}

pub fn clamp_story_count(count: i64) -> usize {
    count.clamp(3, 20) as usize
}

fn prefs_from_row(row: crate::models::briefing::BriefingPreferencesRow) -> BriefingPrefs {
    let mut sections = default_sections();
    for (key, enabled) in sanitize_sections(&row.sections) {
        sections.insert(key, enabled);
    }
    let custom_section_prompts: Vec<String> =
        serde_json::from_value(row.custom_section_prompts).unwrap_or_default();

    BriefingPrefs {
        user_id: row.user_id,
        enabled: row.enabled,
        frequency: Frequency::from_str(&row.frequency).unwrap_or_default(),
        preferred_hour: row.preferred_hour.and_then(|h| u32::try_from(h).ok()),
        story_count: clamp_story_count(row.story_count as i64),
        summary_length: SummaryLength::from_str(&row.summary_length).unwrap_or_default(),
        summary_style: SummaryStyle::from_str(&row.summary_style).unwrap_or_default(),
        sections,
        custom_section_prompts: sanitize_custom_prompts(&custom_section_prompts),
        briefing_model: row.briefing_model,
        story_sources: row.story_sources,
        read_filter: ReadFilter::from_str(&row.read_filter).unwrap_or_default(),
        briefing_feed_id: row.briefing_feed_id,
    }
}

pub async fn get_or_create_prefs(
    conn: &mut AsyncPgConnection,
    user_id: i32,
) -> Result<BriefingPrefs, eyre::Error> {
    use crate::schema::briefing_preferences::dsl;

    let existing = dsl::briefing_preferences
        .filter(dsl::user_id.eq(user_id))
        .first::<crate::models::briefing::BriefingPreferencesRow>(conn)
        .await
        .optional()?;

    if let Some(row) = existing {
        return Ok(prefs_from_row(row));
    }

    let defaults = BriefingPrefs {
        user_id,
        ..Default::default()
    };
    save_prefs(conn, &defaults).await?;
    Ok(defaults)
}

pub async fn save_prefs(
    conn: &mut AsyncPgConnection,
    prefs: &BriefingPrefs,
) -> Result<(), eyre::Error> {
    use crate::schema::briefing_preferences::dsl;

    let row = crate::models::briefing::NewBriefingPreferences {
        user_id: prefs.user_id,
        enabled: prefs.enabled,
        frequency: prefs.frequency.as_str().to_string(),
        preferred_hour: prefs.preferred_hour.map(|h| h as i32),
        story_count: prefs.story_count as i32,
        summary_length: prefs.summary_length.as_str().to_string(),
        summary_style: prefs.summary_style.as_str().to_string(),
        sections: serde_json::to_value(&prefs.sections)?,
        custom_section_prompts: serde_json::to_value(&prefs.custom_section_prompts)?,
        briefing_model: prefs.briefing_model.clone(),
        story_sources: prefs.story_sources.clone(),
        read_filter: prefs.read_filter.as_str().to_string(),
        briefing_feed_id: prefs.briefing_feed_id,
        updated_at: Utc::now().naive_utc(),
    };

    diesel::insert_into(dsl::briefing_preferences)
        .values(&row)
        .on_conflict(dsl::user_id)
        .do_update()
        .set((
            dsl::enabled.eq(&row.enabled),
            dsl::frequency.eq(&row.frequency),
            dsl::preferred_hour.eq(&row.preferred_hour),
            dsl::story_count.eq(&row.story_count),
            dsl::summary_length.eq(&row.summary_length),
            dsl::summary_style.eq(&row.summary_style),
            dsl::sections.eq(&row.sections),
            dsl::custom_section_prompts.eq(&row.custom_section_prompts),
            dsl::briefing_model.eq(&row.briefing_model),
            dsl::story_sources.eq(&row.story_sources),
            dsl::read_filter.eq(&row.read_filter),
            dsl::briefing_feed_id.eq(&row.briefing_feed_id),
            dsl::updated_at.eq(&row.updated_at),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn exists_for_period(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    period_start: NaiveDateTime,
    period_end: NaiveDateTime,
) -> Result<bool, eyre::Error> {
    use crate::schema::briefings::dsl;

    let count: i64 = dsl::briefings
        .filter(dsl::user_id.eq(user_id))
        .filter(dsl::briefing_date.ge(period_start))
        .filter(dsl::briefing_date.lt(period_end))
        .count()
        .get_result(conn)
        .await?;
    Ok(count > 0)
}

/// Complete briefings for a user, newest first.
pub async fn latest_for_user(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    limit: i64,
) -> Result<Vec<Briefing>, eyre::Error> {
    use crate::schema::briefings::dsl;

    Ok(dsl::briefings
        .filter(dsl::user_id.eq(user_id))
        .filter(dsl::status.eq(STATUS_COMPLETE))
        .order(dsl::briefing_date.desc())
        .limit(limit)
        .load(conn)
        .await?)
}

/// Users whose briefing preferences are enabled, for the sweep.
pub async fn enabled_user_ids(conn: &mut AsyncPgConnection) -> Result<Vec<i32>, eyre::Error> {
    use crate::schema::briefing_preferences::dsl;

    Ok(dsl::briefing_preferences
        .filter(dsl::enabled.eq(true))
        .select(dsl::user_id)
        .load(conn)
        .await?)
}

/// Idempotently create the user's synthetic briefing feed, subscribe them to
/// it, and point their preferences at it.
pub async fn ensure_briefing_feed(
    conn: &mut AsyncPgConnection,
    user: &User,
) -> Result<Feed, eyre::Error> {
    use crate::schema::{feeds, user_subscriptions};

    let address = format!("daily-briefing:{}", user.id);
    let existing = feeds::table
        .filter(feeds::feed_address.eq(&address))
        .select(Feed::as_select())
        .first::<Feed>(conn)
        .await
        .optional()?;

    let feed = match existing {
        Some(feed) => feed,
        None => {
            diesel::insert_into(feeds::table)
                .values(NewFeed {
                    feed_address: address.clone(),
                    feed_link: None,
                    feed_title: "Daily Briefing".to_string(),
                    branch_from_feed: None,
                })
                .execute(conn)
                .await?;
            feeds::table
                .filter(feeds::feed_address.eq(&address))
                .select(Feed::as_select())
                .first::<Feed>(conn)
                .await?
        }
    };

    let subscribed: i64 = user_subscriptions::table
        .filter(user_subscriptions::user_id.eq(user.id))
        .filter(user_subscriptions::feed_id.eq(feed.id))
        .count()
        .get_result(conn)
        .await?;
    if subscribed == 0 {
        diesel::insert_into(user_subscriptions::table)
            .values(NewUserSubscription {
                user_id: user.id,
                feed_id: feed.id,
                active: true,
                needs_unread_recalc: false,
                folder: None,
            })
            .execute(conn)
            .await?;
    }

    let mut prefs = get_or_create_prefs(conn, user.id).await?;
    if prefs.briefing_feed_id != Some(feed.id) {
        prefs.briefing_feed_id = Some(feed.id);
        save_prefs(conn, &prefs).await?;
    }

    Ok(feed)
}

/// "Morning" before noon, "Afternoon" through 16:59, "Evening" after.
pub fn briefing_title(local_hour: u32, local_date: chrono::NaiveDate) -> String {
    let day_part = match local_hour {
        0..=11 => "Morning",
        12..=16 => "Afternoon",
        _ => "Evening",
    };
    format!("{} Briefing – {}", day_part, local_date.format("%b %d"))
}

pub struct BriefingContent {
    pub summary_html: String,
    pub curated_story_hashes: Vec<String>,
    pub curated_sections: HashMap<String, Vec<String>>,
    pub section_summaries: HashMap<String, String>,
    pub model_name: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Persist the generated briefing: insert the summary story under the
/// synthetic feed, write the briefing record as `complete`, flag the
/// subscription for unread recalculation, and index the story hash.
pub async fn create_briefing_story(
    ctx: &App,
    feed: &Feed,
    user: &User,
    content: BriefingContent,
    briefing_date: NaiveDateTime,
    period_start: NaiveDateTime,
) -> Result<(Briefing, String), eyre::Error> {
    use crate::schema::{briefings, stories, user_subscriptions};

    let mut conn = ctx.diesel.get().await?;

    let tz: Tz = user.timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = briefing_date.and_utc().with_timezone(&tz);
    let title = briefing_title(local.hour(), local.date_naive());

    let guid = uuid::Uuid::new_v4().simple().to_string();
    let story_hash = format!("{}:{}", feed.id, guid);
    diesel::insert_into(stories::table)
        .values(NewStory {
            story_hash: story_hash.clone(),
            story_feed_id: feed.id,
            story_title: title,
            story_author: Some("NewsBrief".to_string()),
            story_date: briefing_date,
            story_content: Some(content.summary_html.clone()),
            story_tags: vec![],
        })
        .execute(&mut conn)
        .await?;

    let briefing: Briefing = diesel::insert_into(briefings::table)
        .values(NewBriefing {
            user_id: user.id,
            briefing_feed_id: feed.id,
            briefing_date,
            period_start,
            generated_at: Utc::now().naive_utc(),
            status: STATUS_COMPLETE.to_string(),
            curated_story_hashes: serde_json::to_value(&content.curated_story_hashes)?,
            curated_sections: serde_json::to_value(&content.curated_sections)?,
            section_summaries: serde_json::to_value(&content.section_summaries)?,
            summary_story_hash: Some(story_hash.clone()),
            model: content.model_name.clone(),
            input_tokens: content.input_tokens as i32,
            output_tokens: content.output_tokens as i32,
        })
        .get_result(&mut conn)
        .await?;

    diesel::update(user_subscriptions::table)
        .filter(user_subscriptions::user_id.eq(user.id))
        .filter(user_subscriptions::feed_id.eq(feed.id))
        .set(user_subscriptions::needs_unread_recalc.eq(true))
        .execute(&mut conn)
        .await?;

    // Index the new story so river loads see it without a fetch cycle
    let mut redis = ctx.redis.clone();
    redis::cmd("ZADD")
        .arg(format!("zF:{}", feed.id))
        .arg(briefing_date.and_utc().timestamp())
        .arg(&story_hash)
        .query_async::<()>(&mut redis)
        .await?;

    Ok((briefing, story_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_section_keys_count() {
        assert_eq!(VALID_SECTION_KEYS.len(), 14);
        assert_eq!(MAX_CUSTOM_SECTIONS, 5);
    }

    #[test]
    fn default_sections_enable_fixed_only() {
        let sections = default_sections();
        for key in FIXED_SECTION_KEYS {
            assert_eq!(sections.get(*key), Some(&true), "{key} should default on");
        }
        for slot in 1..=MAX_CUSTOM_SECTIONS {
            assert_eq!(sections.get(&format!("custom_{slot}")), Some(&false));
        }
    }

    #[test]
    fn sanitize_sections_drops_unknown_keys() {
        let value = serde_json::json!({
            "trending_global": true,
            "long_read": false,
            "not_a_section": true,
            "custom_9": true,
        });
        let sections = sanitize_sections(&value);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections.get("trending_global"), Some(&true));
        assert_eq!(sections.get("long_read"), Some(&false));
        assert!(!sections.contains_key("not_a_section"));
    }

    #[test]
    fn sanitize_custom_prompts_filters_and_caps() {
        let prompts: Vec<String> = vec![
            "  rust lang  ".into(),
            "".into(),
            "   ".into(),
            "ai".into(),
            "space".into(),
            "chips".into(),
            "energy".into(),
            "one too many".into(),
        ];
        let cleaned = sanitize_custom_prompts(&prompts);
        assert_eq!(cleaned.len(), MAX_CUSTOM_SECTIONS);
        assert_eq!(cleaned[0], "rust lang");
        assert!(!cleaned.iter().any(|p| p.is_empty()));
    }

    #[test]
    fn story_count_clamps() {
        assert_eq!(clamp_story_count(0), 3);
        assert_eq!(clamp_story_count(5), 5);
        assert_eq!(clamp_story_count(100), 20);
    }

    #[test]
    fn invalid_enum_values_fall_back() {
        assert_eq!(Frequency::from_str("hourly"), None);
        assert_eq!(SummaryLength::from_str("verbose"), None);
        assert_eq!(SummaryStyle::from_str("haiku"), None);
        assert_eq!(ReadFilter::from_str("skimmed"), None);
    }

    #[test]
    fn frequency_periods_and_thresholds() {
        assert_eq!(Frequency::Daily.period(), chrono::Duration::hours(24));
        assert_eq!(Frequency::TwiceDaily.period(), chrono::Duration::hours(12));
        assert_eq!(Frequency::Weekly.period(), chrono::Duration::days(7));
        assert_eq!(Frequency::Daily.min_stories(), 3);
        assert_eq!(Frequency::Weekly.min_stories(), 3);
        assert_eq!(Frequency::TwiceDaily.min_stories(), 1);
    }

    #[test]
    fn briefing_titles_follow_local_hour() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(briefing_title(6, date), "Morning Briefing – Jan 15");
        assert_eq!(briefing_title(11, date), "Morning Briefing – Jan 15");
        assert_eq!(briefing_title(12, date), "Afternoon Briefing – Jan 15");
        assert_eq!(briefing_title(16, date), "Afternoon Briefing – Jan 15");
        assert_eq!(briefing_title(17, date), "Evening Briefing – Jan 15");
        assert_eq!(briefing_title(23, date), "Evening Briefing – Jan 15");
    }

    #[test]
    fn source_folder_parses() {
        let mut prefs = BriefingPrefs::default();
        assert_eq!(prefs.source_folder(), None);
        prefs.story_sources = "folder:Tech".to_string();
        assert_eq!(prefs.source_folder(), Some("Tech"));
    }
}
