//! Redis-backed LLM cost accounting.
//!
//! Counters are bucketed by day and broken down by provider, feature and
//! model, with a daily unique-user set. Cost is stored as an integer in
//! micro-dollars so INCRBY stays exact. Daily keys expire after 60 days;
//! `LLM:known_models` never expires and exists so stats reads can MGET
//! directly instead of scanning the key space.

use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;

const KEY_PREFIX: &str = "LLM";
const KEY_EXPIRY_DAYS: i64 = 60;

pub const PROVIDERS: &[&str] = &["anthropic", "openai", "google", "xai"];
pub const FEATURES: &[&str] = &[
    "daily_briefing",
    "archive_assistant",
    "ask_ai",
    "story_classification",
    "transcription",
    "search_story_embedding",
    "search_query_embedding",
    "search_feed_embedding",
];
const METRICS: &[&str] = &["tokens", "cost", "requests"];

fn date_key(days_ago: i64) -> String {
    (Utc::now().date_naive() - Duration::days(days_ago))
        .format("%Y-%m-%d")
        .to_string()
}

fn expiry_timestamp() -> i64 {
    (Utc::now().date_naive() + Duration::days(KEY_EXPIRY_DAYS))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
        .timestamp()
}

/// Model names become key segments; `-` and `.` are swapped for `_`.
pub fn sanitize_model_name(model: &str) -> String {
    model.replace(['-', '.'], "_")
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UsageTotals {
    pub tokens: u64,
    pub cost_micro: u64,
    pub requests: u64,
}

impl UsageTotals {
    pub fn cost_usd(&self) -> f64 {
        self.cost_micro as f64 / 1_000_000.0
    }
}

/// Record one LLM API call.
pub async fn record_usage(
    redis: &mut ConnectionManager,
    provider: &str,
    model: &str,
    feature: &str,
    input_tokens: u32,
    output_tokens: u32,
    cost_usd: f64,
    user_id: Option<i32>,
) -> eyre::Result<()> {
    let date = date_key(0);
    let expiry = expiry_timestamp();
    let total_tokens = (input_tokens + output_tokens) as u64;
    let cost_micro = (cost_usd * 1_000_000.0).round() as u64;
    let model_safe = sanitize_model_name(model);

    let mut pipe = redis::pipe();
    let prefixes = [
        format!("{KEY_PREFIX}:{date}:provider:{provider}"),
        format!("{KEY_PREFIX}:{date}:feature:{feature}"),
        format!("{KEY_PREFIX}:{date}:model:{model_safe}"),
        format!("{KEY_PREFIX}:{date}:total"),
    ];
    for prefix in &prefixes {
        pipe.cmd("INCRBY")
            .arg(format!("{prefix}:tokens"))
            .arg(total_tokens);
        pipe.cmd("INCRBY")
            .arg(format!("{prefix}:cost"))
            .arg(cost_micro);
        pipe.cmd("INCR").arg(format!("{prefix}:requests"));
        for metric in METRICS {
            pipe.cmd("EXPIREAT")
                .arg(format!("{prefix}:{metric}"))
                .arg(expiry);
        }
    }

    if let Some(user_id) = user_id {
        let user_key = format!("{KEY_PREFIX}:{date}:users");
        pipe.sadd(&user_key, user_id);
        pipe.cmd("EXPIREAT").arg(&user_key).arg(expiry);
    }

    pipe.sadd(format!("{KEY_PREFIX}:known_models"), &model_safe);

    pipe.query_async::<()>(redis).await?;
    Ok(())
}

/// Aggregate stats for the trailing `days` days, keyed by category
/// (`total`, `provider:anthropic`, `feature:daily_briefing`, ...). Model
/// breakdowns are included only for single-day reads.
pub async fn get_period_stats(
    redis: &mut ConnectionManager,
    days: i64,
) -> eyre::Result<HashMap<String, UsageTotals>> {
    let mut keys: Vec<String> = Vec::new();
    let mut meta: Vec<(String, &str)> = Vec::new();

    for day in 0..days {
        let date = date_key(day);
        let prefix = format!("{KEY_PREFIX}:{date}");
        for metric in METRICS {
            keys.push(format!("{prefix}:total:{metric}"));
            meta.push(("total".to_string(), metric));
        }
        for provider in PROVIDERS {
            for metric in METRICS {
                keys.push(format!("{prefix}:provider:{provider}:{metric}"));
                meta.push((format!("provider:{provider}"), metric));
            }
        }
        for feature in FEATURES {
            for metric in METRICS {
                keys.push(format!("{prefix}:feature:{feature}:{metric}"));
                meta.push((format!("feature:{feature}"), metric));
            }
        }
    }

    let values: Vec<Option<u64>> = redis::cmd("MGET").arg(&keys).query_async(redis).await?;

    let mut stats: HashMap<String, UsageTotals> = HashMap::new();
    for (value, (category, metric)) in values.into_iter().zip(meta) {
        let Some(value) = value else { continue };
        let entry = stats.entry(category).or_default();
        match metric {
            "tokens" => entry.tokens += value,
            "cost" => entry.cost_micro += value,
            _ => entry.requests += value,
        }
    }

    if days == 1 {
        let known_models: Vec<String> = redis::cmd("SMEMBERS")
            .arg(format!("{KEY_PREFIX}:known_models"))
            .query_async(redis)
            .await?;
        if !known_models.is_empty() {
            let prefix = format!("{KEY_PREFIX}:{}", date_key(0));
            let mut model_keys = Vec::new();
            let mut model_meta = Vec::new();
            for model in &known_models {
                for metric in METRICS {
                    model_keys.push(format!("{prefix}:model:{model}:{metric}"));
                    model_meta.push((format!("model:{model}"), metric));
                }
            }
            let model_values: Vec<Option<u64>> = redis::cmd("MGET")
                .arg(&model_keys)
                .query_async(redis)
                .await?;
            for (value, (category, metric)) in model_values.into_iter().zip(model_meta) {
                let Some(value) = value else { continue };
                let entry = stats.entry(category).or_default();
                match *metric {
                    "tokens" => entry.tokens += value,
                    "cost" => entry.cost_micro += value,
                    _ => entry.requests += value,
                }
            }
        }
    }

    Ok(stats)
}

/// Distinct users over the trailing `days` days via set union.
pub async fn get_unique_users(redis: &mut ConnectionManager, days: i64) -> eyre::Result<u64> {
    if days == 1 {
        let count: u64 = redis::cmd("SCARD")
            .arg(format!("{KEY_PREFIX}:{}:users", date_key(0)))
            .query_async(redis)
            .await?;
        return Ok(count);
    }
    let keys: Vec<String> = (0..days)
        .map(|day| format!("{KEY_PREFIX}:{}:users", date_key(day)))
        .collect();
    let users: Vec<String> = redis::cmd("SUNION").arg(&keys).query_async(redis).await?;
    Ok(users.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_sanitize_for_keys() {
        assert_eq!(
            sanitize_model_name("claude-sonnet-4.5"),
            "claude_sonnet_4_5"
        );
        assert_eq!(sanitize_model_name("gpt-5-mini"), "gpt_5_mini");
    }

    #[test]
    fn cost_micro_rounds() {
        // 123456.789 micro-dollars rounds to 123457
        let cost_usd: f64 = 0.123456789;
        let cost_micro = (cost_usd * 1_000_000.0).round() as u64;
        assert_eq!(cost_micro, 123457);
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn record_usage_accumulates() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();

        record_usage(
            &mut conn,
            "anthropic",
            "claude-haiku-4-5",
            "daily_briefing",
            100,
            50,
            0.00035,
            Some(42),
        )
        .await
        .unwrap();

        let stats = get_period_stats(&mut conn, 1).await.unwrap();
        let total = stats.get("total").copied().unwrap_or_default();
        assert!(total.tokens >= 150);
        assert!(total.requests >= 1);
        assert!(get_unique_users(&mut conn, 1).await.unwrap() >= 1);
    }
}
