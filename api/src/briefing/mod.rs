//! Personalized briefing engine: candidate scoring, LLM summarization,
//! section processing, scheduled workers and the thin HTTP surface over
//! them. Authentication happens upstream; handlers here trust `user_id`.

use axum::{
    Router,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::AppError;
use crate::json::Json;
use crate::{App, metrics_line};

pub mod activity;
pub mod models;
pub mod scoring;
pub mod sections;
pub mod summary;
pub mod tasks;

use models::{
    BriefingPrefs, Frequency, ReadFilter, SummaryLength, SummaryStyle, clamp_story_count,
    sanitize_custom_prompts, sanitize_sections,
};

pub fn route() -> Router<App> {
    Router::<App>::new()
        .route("/briefing/generate", post(trigger_generate))
        .route("/briefing/stream", get(event_stream))
        .route("/briefing/status", get(briefing_status))
        .route(
            "/briefing/preferences",
            get(get_preferences).post(update_preferences),
        )
        .route("/briefing/activity", post(record_activity))
        .route("/metrics/llm", get(llm_metrics))
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: i32,
}

#[derive(Serialize)]
struct GenerateResponse {
    briefing_feed_id: i32,
}

/// Manually trigger a briefing. Enables the preference if needed so a first
/// tap on "generate" does what the user means, then runs the worker in the
/// background with lifecycle events.
async fn trigger_generate(
    State(ctx): State<App>,
    Query(query): Query<UserQuery>,
) -> Result<Json<GenerateResponse>, AppError> {
    use crate::schema::users;
    use diesel::prelude::*;
    use diesel_async::RunQueryDsl;

    let mut conn = ctx.diesel.get().await?;
    let user = users::table
        .filter(users::id.eq(query.user_id))
        .select(crate::models::user::User::as_select())
        .first::<crate::models::user::User>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| {
            AppError::Status("unknown user".into(), axum::http::StatusCode::NOT_FOUND)
        })?;

    let mut prefs = models::get_or_create_prefs(&mut conn, user.id).await?;
    if !prefs.enabled {
        prefs.enabled = true;
        models::save_prefs(&mut conn, &prefs).await?;
    }
    let feed = models::ensure_briefing_feed(&mut conn, &user).await?;
    drop(conn);

    let task_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(err) = tasks::generate_user_briefing(&task_ctx, query.user_id, true).await {
            tracing::error!(user_id = query.user_id, ?err, "on-demand briefing failed");
        }
    });

    Ok(Json(GenerateResponse {
        briefing_feed_id: feed.id,
    }))
}

/// Bridge the briefing pub/sub channel to SSE for the client.
async fn event_stream(
    State(ctx): State<App>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>>, AppError>
{
    let stream = BroadcastStream::new(ctx.events.subscribe())
        .filter_map(|event| async move { event.ok() })
        .map(|payload| Ok(Event::default().data(payload)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

#[derive(Serialize)]
struct StatusResponse {
    enabled: bool,
    frequency: Frequency,
    last_generated_at: Option<chrono::NaiveDateTime>,
    next_generation_time: Option<chrono::NaiveDateTime>,
}

async fn briefing_status(
    State(ctx): State<App>,
    Query(query): Query<UserQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    use crate::schema::users;
    use diesel::prelude::*;
    use diesel_async::RunQueryDsl;

    let mut conn = ctx.diesel.get().await?;
    let prefs = models::get_or_create_prefs(&mut conn, query.user_id).await?;
    let last = models::latest_for_user(&mut conn, query.user_id, 1).await?;

    let next_generation_time = if prefs.enabled {
        let timezone: Option<String> = users::table
            .filter(users::id.eq(query.user_id))
            .select(users::timezone)
            .first(&mut conn)
            .await
            .optional()?;
        let timezone = timezone.unwrap_or_else(|| "UTC".to_string());
        let mut redis = ctx.redis.clone();
        Some(match prefs.preferred_hour {
            Some(hour) => activity::generation_time_for_hour(
                Some(hour),
                timezone.parse().unwrap_or(chrono_tz::UTC),
            ),
            None => {
                activity::get_briefing_generation_time(&mut redis, query.user_id, &timezone)
                    .await?
            }
        })
    } else {
        None
    };

    Ok(Json(StatusResponse {
        enabled: prefs.enabled,
        frequency: prefs.frequency,
        last_generated_at: last.get(0).map(|b| b.generated_at),
        next_generation_time,
    }))
}

/// Count one user action against their local hour, feeding the histogram
/// that picks a personalized generation time.
async fn record_activity(
    State(ctx): State<App>,
    Query(query): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    use crate::schema::users;
    use diesel::prelude::*;
    use diesel_async::RunQueryDsl;

    let mut conn = ctx.diesel.get().await?;
    let timezone: Option<String> = users::table
        .filter(users::id.eq(query.user_id))
        .select(users::timezone)
        .first(&mut conn)
        .await
        .optional()?;
    let timezone = timezone.unwrap_or_else(|| "UTC".to_string());
    drop(conn);

    let mut redis = ctx.redis.clone();
    activity::record_activity(&mut redis, query.user_id, &timezone).await?;
    Ok(Json(serde_json::json!({ "recorded": true })))
}

async fn get_preferences(
    State(ctx): State<App>,
    Query(query): Query<UserQuery>,
) -> Result<Json<BriefingPrefs>, AppError> {
    let mut conn = ctx.diesel.get().await?;
    let prefs = models::get_or_create_prefs(&mut conn, query.user_id).await?;
    Ok(Json(prefs))
}

#[derive(Deserialize, Default)]
struct PreferencesUpdate {
    enabled: Option<bool>,
    frequency: Option<String>,
    /// Local hour 0-23, or any negative value for automatic scheduling.
    preferred_hour: Option<i32>,
    story_count: Option<i64>,
    summary_length: Option<String>,
    summary_style: Option<String>,
    sections: Option<serde_json::Value>,
    custom_section_prompts: Option<Vec<String>>,
    /// "default" clears the selection back to the default model.
    briefing_model: Option<String>,
    story_sources: Option<String>,
    read_filter: Option<String>,
}

/// Merge an update into preferences. Invalid enum values and unknown
/// section keys are silently dropped rather than rejected.
fn apply_preferences_update(prefs: &mut BriefingPrefs, update: PreferencesUpdate) {
    if let Some(enabled) = update.enabled {
        prefs.enabled = enabled;
    }
    if let Some(frequency) = update.frequency.as_deref().and_then(Frequency::from_str) {
        prefs.frequency = frequency;
    }
    if let Some(hour) = update.preferred_hour {
        prefs.preferred_hour = (0..24).contains(&hour).then_some(hour as u32);
    }
    if let Some(count) = update.story_count {
        prefs.story_count = clamp_story_count(count);
    }
    if let Some(length) = update
        .summary_length
        .as_deref()
        .and_then(SummaryLength::from_str)
    {
        prefs.summary_length = length;
    }
    if let Some(style) = update
        .summary_style
        .as_deref()
        .and_then(SummaryStyle::from_str)
    {
        prefs.summary_style = style;
    }
    if let Some(sections) = &update.sections {
        for (key, enabled) in sanitize_sections(sections) {
            prefs.sections.insert(key, enabled);
        }
    }
    if let Some(prompts) = &update.custom_section_prompts {
        prefs.custom_section_prompts = sanitize_custom_prompts(prompts);
    }
    if let Some(model) = update.briefing_model.as_deref() {
        prefs.briefing_model = if model == "default" || !crate::llm::is_registered_model(model) {
            None
        } else {
            Some(model.to_string())
        };
    }
    if let Some(sources) = update.story_sources {
        if sources == "all" || sources.starts_with("folder:") {
            prefs.story_sources = sources;
        }
    }
    if let Some(filter) = update.read_filter.as_deref().and_then(ReadFilter::from_str) {
        prefs.read_filter = filter;
    }
}

async fn update_preferences(
    State(ctx): State<App>,
    Query(query): Query<UserQuery>,
    Json(update): Json<PreferencesUpdate>,
) -> Result<Json<BriefingPrefs>, AppError> {
    let mut conn = ctx.diesel.get().await?;
    let mut prefs = models::get_or_create_prefs(&mut conn, query.user_id).await?;
    apply_preferences_update(&mut prefs, update);
    models::save_prefs(&mut conn, &prefs).await?;
    Ok(Json(prefs))
}

async fn llm_metrics(State(ctx): State<App>) -> Result<String, AppError> {
    let mut redis = ctx.redis.clone();
    let daily = crate::llm::costs::get_period_stats(&mut redis, 1).await?;
    let weekly = crate::llm::costs::get_period_stats(&mut redis, 7).await?;
    let monthly = crate::llm::costs::get_period_stats(&mut redis, 30).await?;

    let mut lines = Vec::new();
    for (period, stats) in [("daily", &daily), ("weekly", &weekly), ("monthly", &monthly)] {
        let mut categories: Vec<&String> = stats.keys().collect();
        categories.sort();
        for category in categories {
            let totals = stats[category];
            lines.push(metrics_line(
                "llm_costs",
                &[("category", category), ("metric", "tokens"), ("period", period)],
                totals.tokens,
            ));
            lines.push(metrics_line(
                "llm_costs",
                &[("category", category), ("metric", "cost_usd"), ("period", period)],
                format!("{:.6}", totals.cost_usd()),
            ));
            lines.push(metrics_line(
                "llm_costs",
                &[("category", category), ("metric", "requests"), ("period", period)],
                totals.requests,
            ));
        }
        let users = crate::llm::costs::get_unique_users(&mut redis, match period {
            "daily" => 1,
            "weekly" => 7,
            _ => 30,
        })
        .await?;
        lines.push(metrics_line(
            "llm_costs",
            &[("metric", "unique_users"), ("period", period)],
            users,
        ));
    }
    Ok(lines.join("\n") + "\n")
}
