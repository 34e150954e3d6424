//! Scheduled and on-demand briefing workers.
//!
//! The sweep task fans out per-user generation under a cross-user lock;
//! each user's worker runs scoring -> summarizing -> processing -> persisting
//! strictly in order under its own lock. Both locks are plain
//! SET-NX-with-TTL keys; lock expiry is the hard ceiling on a stuck run.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::App;
use crate::briefing::activity;
use crate::briefing::models::{self, BriefingContent, DEFAULT_SECTION, ensure_briefing_feed};
use crate::briefing::scoring::{ScoredStory, SelectOptions, select_briefing_stories};
use crate::briefing::sections::{
    EmbedContext, embed_briefing_icons, extract_section_story_hashes, extract_section_summaries,
    filter_disabled_sections,
};
use crate::briefing::summary::{SummaryMetadata, generate_briefing_summary};
use crate::models::user::User;

const LOCK_TTL_SECONDS: u64 = 840;
pub const GENERATE_ALL_LOCK: &str = "briefing:generate_all_lock";
pub const EVENTS_CHANNEL: &str = "briefing:events";

fn user_lock_key(user_id: i32) -> String {
    format!("briefing:generate_user:{user_id}")
}

async fn acquire_lock(
    redis: &mut redis::aio::ConnectionManager,
    key: &str,
) -> Result<bool, eyre::Error> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg("1")
        .arg("NX")
        .arg("EX")
        .arg(LOCK_TTL_SECONDS)
        .query_async(redis)
        .await?;
    Ok(reply.is_some())
}

/// Sweep all briefing-enabled users and dispatch workers for those whose
/// generation time has arrived. Skips the whole tick when another process
/// holds the sweep lock.
#[tracing::instrument(skip(ctx))]
pub async fn generate_briefings(ctx: &App) -> Result<(), eyre::Error> {
    let mut redis = ctx.redis.clone();
    if !acquire_lock(&mut redis, GENERATE_ALL_LOCK).await? {
        tracing::debug!("briefing sweep already running elsewhere");
        return Ok(());
    }

    let mut conn = ctx.diesel.get().await?;
    let user_ids = models::enabled_user_ids(&mut conn).await?;
    drop(conn);

    let now = Utc::now().naive_utc();
    let mut dispatched = 0;
    for user_id in user_ids {
        let mut conn = ctx.diesel.get().await?;
        let Some(user) = load_user(&mut conn, user_id).await? else {
            continue;
        };
        let prefs = models::get_or_create_prefs(&mut conn, user_id).await?;
        drop(conn);

        let generation_time = match prefs.preferred_hour {
            Some(hour) => {
                let tz: chrono_tz::Tz = user.timezone.parse().unwrap_or(chrono_tz::UTC);
                activity::generation_time_for_hour(Some(hour), tz)
            }
            None => {
                activity::get_briefing_generation_time(&mut redis, user_id, &user.timezone).await?
            }
        };
        if now < generation_time {
            continue;
        }

        let mut conn = ctx.diesel.get().await?;
        let period_start = now - prefs.frequency.period();
        if models::exists_for_period(&mut conn, user_id, period_start, now).await? {
            continue;
        }
        drop(conn);

        dispatched += 1;
        let task_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = generate_user_briefing(&task_ctx, user_id, false).await {
                tracing::error!(user_id, ?err, "briefing generation failed");
            }
        });
    }

    if dispatched > 0 {
        tracing::info!(dispatched, "dispatched briefing workers");
    }
    Ok(())
}

enum Outcome {
    Completed { story_hash: String, feed_id: i32 },
    Skipped(&'static str),
    Failed(&'static str),
}

/// Generate one user's briefing. Lock contention returns quietly; the
/// on-demand flag drives lifecycle events and lock release.
#[tracing::instrument(skip(ctx))]
pub async fn generate_user_briefing(
    ctx: &App,
    user_id: i32,
    on_demand: bool,
) -> Result<(), eyre::Error> {
    let mut redis = ctx.redis.clone();
    let lock_key = user_lock_key(user_id);
    if !acquire_lock(&mut redis, &lock_key).await? {
        tracing::debug!(user_id, "briefing already generating for user");
        return Ok(());
    }

    let result = run_user_briefing(ctx, user_id, on_demand).await;

    // Scheduled runs let the lock age out; on-demand runs clear it so the
    // user can immediately trigger again.
    if on_demand {
        if let Err(err) = redis::cmd("DEL")
            .arg(&lock_key)
            .query_async::<()>(&mut redis)
            .await
        {
            tracing::warn!(user_id, ?err, "failed to release briefing lock");
        }
    }

    match result? {
        Outcome::Completed {
            story_hash,
            feed_id,
        } => {
            tracing::info!(user_id, %story_hash, "briefing complete");
            if on_demand {
                publish_event(
                    &mut redis,
                    serde_json::json!({
                        "type": "complete",
                        "user_id": user_id,
                        "briefing_feed_id": feed_id,
                        "story_hash": story_hash,
                    }),
                )
                .await;
            }
        }
        Outcome::Skipped(reason) => {
            tracing::debug!(user_id, reason, "briefing skipped");
        }
        Outcome::Failed(reason) => {
            tracing::error!(user_id, reason, "briefing failed");
        }
    }
    Ok(())
}

async fn run_user_briefing(
    ctx: &App,
    user_id: i32,
    on_demand: bool,
) -> Result<Outcome, eyre::Error> {
    let mut redis = ctx.redis.clone();
    let mut conn = ctx.diesel.get().await?;

    let Some(user) = load_user(&mut conn, user_id).await? else {
        return Ok(Outcome::Skipped("user not found"));
    };
    let prefs = models::get_or_create_prefs(&mut conn, user_id).await?;
    if !prefs.enabled {
        return Ok(Outcome::Skipped("briefing disabled"));
    }

    let now = Utc::now().naive_utc();
    let period_start = now - prefs.frequency.period();
    if models::exists_for_period(&mut conn, user_id, period_start, now).await? {
        return Ok(Outcome::Skipped("briefing already exists for period"));
    }

    let feed = ensure_briefing_feed(&mut conn, &user).await?;
    drop(conn);

    let scored = select_briefing_stories(
        ctx,
        user_id,
        period_start,
        now,
        SelectOptions {
            max_stories: prefs.story_count,
            read_filter: prefs.read_filter,
            source_folder: prefs.source_folder(),
            custom_prompts: &prefs.custom_section_prompts,
            enabled_sections: &prefs.sections,
        },
    )
    .await?;
    if scored.len() < prefs.frequency.min_stories() {
        return Ok(Outcome::Skipped("not enough candidate stories"));
    }

    if on_demand {
        publish_event(
            &mut redis,
            serde_json::json!({ "type": "start", "user_id": user_id }),
        )
        .await;
    }

    let Some((summary_html, metadata)) =
        generate_briefing_summary(ctx, user_id, &scored, now, &prefs).await?
    else {
        return Ok(Outcome::Failed("summary generation failed"));
    };

    // Enforce the section contract on the model's output
    let filtered_html = filter_disabled_sections(&summary_html, &prefs.sections);
    let section_summaries = extract_section_summaries(&filtered_html);
    let section_hashes = extract_section_story_hashes(&section_summaries);
    let curated_sections = curate_sections(&section_hashes, &scored, &prefs.sections);

    let embed_ctx = build_embed_context(ctx, &scored).await?;
    let mut final_html = embed_briefing_icons(&filtered_html, &embed_ctx);
    final_html.push_str(&debug_footer(&metadata));

    let content = BriefingContent {
        summary_html: final_html,
        curated_story_hashes: scored.iter().map(|s| s.story_hash.clone()).collect(),
        curated_sections,
        section_summaries: section_summaries.into_iter().collect(),
        model_name: Some(metadata.model_name.clone()),
        input_tokens: metadata.input_tokens,
        output_tokens: metadata.output_tokens,
    };

    let (briefing, story_hash) =
        models::create_briefing_story(ctx, &feed, &user, content, now, period_start).await?;

    Ok(Outcome::Completed {
        story_hash,
        feed_id: briefing.briefing_feed_id,
    })
}

async fn load_user(
    conn: &mut diesel_async::AsyncPgConnection,
    user_id: i32,
) -> Result<Option<User>, eyre::Error> {
    use crate::schema::users;
    Ok(users::table
        .filter(users::id.eq(user_id))
        .select(User::as_select())
        .first::<User>(conn)
        .await
        .optional()?)
}

/// Build the per-section hash lists for the briefing record. Hashes the
/// model placed in (enabled) sections keep that placement, filtered to the
/// curated set so an invented hash can never leak in; stories the model
/// skipped fall back to their scored category, remapped to the default
/// section when that category's section is disabled.
fn curate_sections(
    extracted: &HashMap<String, Vec<String>>,
    scored: &[ScoredStory],
    active_sections: &HashMap<String, bool>,
) -> HashMap<String, Vec<String>> {
    let curated: std::collections::HashSet<&str> =
        scored.iter().map(|s| s.story_hash.as_str()).collect();

    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut placed: std::collections::HashSet<String> = std::collections::HashSet::new();
    for (key, hashes) in extracted {
        let kept: Vec<String> = hashes
            .iter()
            .filter(|hash| curated.contains(hash.as_str()))
            .filter(|hash| placed.insert((*hash).clone()))
            .cloned()
            .collect();
        if !kept.is_empty() {
            sections.insert(key.clone(), kept);
        }
    }

    for story in scored {
        if placed.contains(&story.story_hash) {
            continue;
        }
        let enabled = active_sections
            .get(&story.category)
            .copied()
            .unwrap_or(false);
        let key = if story.category == DEFAULT_SECTION || enabled {
            story.category.clone()
        } else {
            DEFAULT_SECTION.to_string()
        };
        sections.entry(key).or_default().push(story.story_hash.clone());
    }
    sections
}

/// Small provenance footer at the end of the briefing body.
fn debug_footer(metadata: &SummaryMetadata) -> String {
    format!(
        r#"<div class="NB-briefing-debug" style="margin-top:24px;font-size:11px;color:#9b9b9b;">{} · {} in / {} out tokens</div>"#,
        metadata.display_name, metadata.input_tokens, metadata.output_tokens,
    )
}

async fn build_embed_context(
    ctx: &App,
    scored: &[ScoredStory],
) -> Result<EmbedContext, eyre::Error> {
    use crate::schema::{feeds, stories};

    let mut conn = ctx.diesel.get().await?;
    let hashes: Vec<&String> = scored.iter().map(|s| &s.story_hash).collect();
    let story_feeds: Vec<(String, i32)> = stories::table
        .filter(stories::story_hash.eq_any(&hashes))
        .select((stories::story_hash, stories::story_feed_id))
        .load(&mut conn)
        .await?;

    let feed_ids: Vec<i32> = story_feeds
        .iter()
        .map(|(_, fid)| *fid)
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    let feed_rows: Vec<(i32, String, Option<String>)> = feeds::table
        .filter(feeds::id.eq_any(&feed_ids))
        .select((feeds::id, feeds::feed_title, feeds::favicon_data))
        .load(&mut conn)
        .await?;

    let mut titles_by_feed: HashMap<i32, String> = HashMap::new();
    let mut favicons_by_feed: HashMap<i32, String> = HashMap::new();
    for (id, title, favicon) in feed_rows {
        titles_by_feed.insert(id, title);
        if let Some(data) = favicon {
            favicons_by_feed.insert(id, format!("data:image/png;base64,{data}"));
        }
    }

    let mut favicon_map = HashMap::new();
    let mut feed_title_map = HashMap::new();
    for (story_hash, feed_id) in story_feeds {
        if let Some(uri) = favicons_by_feed.get(&feed_id) {
            favicon_map.insert(story_hash.clone(), uri.clone());
        }
        if let Some(title) = titles_by_feed.get(&feed_id) {
            feed_title_map.insert(story_hash, title.clone());
        }
    }

    Ok(EmbedContext {
        favicon_map,
        feed_title_map,
        site_url: ctx.config.site_url.clone(),
    })
}

async fn publish_event(redis: &mut redis::aio::ConnectionManager, payload: serde_json::Value) {
    let message = format!("briefing:{payload}");
    if let Err(err) = redis::cmd("PUBLISH")
        .arg(EVENTS_CHANNEL)
        .arg(&message)
        .query_async::<i64>(redis)
        .await
    {
        tracing::warn!(?err, "failed to publish briefing event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::briefing::models::default_sections;

    fn scored(hash: &str, category: &str) -> ScoredStory {
        ScoredStory {
            story_hash: hash.to_string(),
            score: 1.0,
            is_read: false,
            category: category.to_string(),
            content_word_count: 100,
            classifier_matches: vec![],
        }
    }

    #[test]
    fn curated_sections_remap_disabled_categories() {
        let mut sections = default_sections();
        sections.insert("long_read".to_string(), false);
        sections.insert("follow_up".to_string(), false);

        let stories = vec![
            scored("1:a", "long_read"),
            scored("2:b", "follow_up"),
            scored("3:c", "trending_global"),
        ];
        let curated = curate_sections(&HashMap::new(), &stories, &sections);

        assert!(!curated.contains_key("long_read"));
        assert!(!curated.contains_key("follow_up"));
        let fallback = curated.get("trending_global").unwrap();
        assert_eq!(fallback.len(), 3);
    }

    #[test]
    fn curated_sections_keep_enabled_categories() {
        let sections = default_sections();
        let stories = vec![scored("1:a", "long_read"), scored("2:b", "duplicates")];
        let curated = curate_sections(&HashMap::new(), &stories, &sections);
        assert_eq!(curated.get("long_read").unwrap(), &vec!["1:a".to_string()]);
        assert_eq!(curated.get("duplicates").unwrap(), &vec!["2:b".to_string()]);
    }

    #[test]
    fn model_placement_wins_over_scored_category() {
        let sections = default_sections();
        let stories = vec![scored("1:a", "long_read"), scored("2:b", "trending_global")];
        let extracted = HashMap::from([(
            "quick_catchup".to_string(),
            vec!["1:a".to_string(), "9:invented".to_string()],
        )]);
        let curated = curate_sections(&extracted, &stories, &sections);

        // 1:a keeps the model's placement; the invented hash is dropped
        assert_eq!(
            curated.get("quick_catchup").unwrap(),
            &vec!["1:a".to_string()]
        );
        assert!(!curated.contains_key("long_read"));
        assert_eq!(
            curated.get("trending_global").unwrap(),
            &vec!["2:b".to_string()]
        );
    }

    #[test]
    fn curated_hashes_all_come_from_the_story_list() {
        let sections = default_sections();
        let stories = vec![
            scored("1:a", "long_read"),
            scored("2:b", "made_up_category"),
        ];
        let curated = curate_sections(&HashMap::new(), &stories, &sections);
        let all_hashes: Vec<&String> = stories.iter().map(|s| &s.story_hash).collect();
        for hashes in curated.values() {
            for hash in hashes {
                assert!(all_hashes.contains(&hash));
            }
        }
        // Unknown categories land in the default section rather than leaking
        assert!(curated.get("trending_global").unwrap().contains(&"2:b".to_string()));
    }

    #[test]
    fn debug_footer_carries_model_and_tokens() {
        let metadata = SummaryMetadata {
            model_name: "claude-haiku".to_string(),
            display_name: "Claude Haiku 4.5".to_string(),
            vendor: "anthropic",
            model_id: "claude-haiku-4-5".to_string(),
            input_tokens: 500,
            output_tokens: 200,
        };
        let footer = debug_footer(&metadata);
        assert!(footer.contains("NB-briefing-debug"));
        assert!(footer.contains("Claude Haiku 4.5"));
        assert!(footer.contains("500"));
        assert!(footer.contains("200"));
    }
}
