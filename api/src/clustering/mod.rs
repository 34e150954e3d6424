//! Cross-feed story clustering.
//!
//! On each feed refresh the engine pulls the trigger feed's recent stories
//! plus stories from feeds sharing archive-tier subscribers, groups
//! duplicates and near-duplicates (exact title, fuzzy word overlap and an
//! optional semantic tier), and writes the cluster index to Redis for the
//! river and briefing paths to consume. Clustering is advisory: any failure
//! here degrades to "no clusters", never to a failed feed.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use axum::{Json, Router, extract::Path, extract::State, routing::get, routing::post};
use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use redis::aio::ConnectionManager;
use serde::Serialize;

use crate::error::AppError;
use crate::models::story::{Story, guid_hash_of};
use crate::{App, metrics_line};

pub mod semantic;
pub mod similarity;
pub mod usage;

use semantic::{SemanticSearchClient, SemanticSearchError};
use similarity::{
    CLUSTER_LOOKBACK_HOURS, CLUSTER_TTL_SECONDS, StoryMeta, find_title_clusters, merge_clusters,
};

/// A feed is clustered at most once per rate window.
const RATE_WINDOW_SECONDS: u64 = 6 * 60 * 60;
const MAX_ARCHIVE_SUBSCRIBERS: i64 = 50;
const MAX_RELATED_FEEDS: usize = 200;
const METADATA_BATCH_SIZE: usize = 100;

pub fn route() -> Router<App> {
    Router::<App>::new()
        .route("/clustering/compute/{feed_id}", post(trigger_compute))
        .route("/clustering/mark-read/{story_hash}", post(mark_read))
        .route("/metrics/clustering", get(clustering_metrics))
}

async fn trigger_compute(
    State(ctx): State<App>,
    Path(feed_id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    tokio::spawn(async move {
        if let Err(err) = compute_story_clusters(&ctx, feed_id).await {
            tracing::warn!(feed_id, ?err, "clustering run failed");
        }
    });
    Ok(Json(serde_json::json!({ "queued": true })))
}

/// The reader calls this when a clustered story is marked read; the
/// response lists the sibling hashes to mark read alongside it.
async fn mark_read(
    State(ctx): State<App>,
    Path(story_hash): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let mut redis = ctx.redis.clone();
    let siblings = mark_read_cluster_expansion(&mut redis, &story_hash).await?;
    Ok(Json(siblings))
}

/// Compute and store clusters for a feed after it updates.
#[tracing::instrument(skip(ctx))]
pub async fn compute_story_clusters(ctx: &App, feed_id: i32) -> Result<(), eyre::Error> {
    let started = Instant::now();
    let mut redis = ctx.redis.clone();

    // Rate limit: once per 6-hour window per feed
    let window = Utc::now().hour() / 6;
    let rate_key = format!(
        "cCL:{}:{}:{}",
        feed_id,
        Utc::now().format("%Y-%m-%d"),
        window
    );
    let already: Option<String> = redis::cmd("GET")
        .arg(&rate_key)
        .query_async(&mut redis)
        .await?;
    if already.is_some() {
        return Ok(());
    }
    redis::cmd("SET")
        .arg(&rate_key)
        .arg(1)
        .arg("EX")
        .arg(RATE_WINDOW_SECONDS)
        .query_async::<()>(&mut redis)
        .await?;

    // Only cluster feeds with archive-tier subscribers
    let mut conn = ctx.diesel.get().await?;
    let subscriber_ids: Vec<i32> = {
        use crate::schema::{user_subscriptions, users};
        user_subscriptions::table
            .inner_join(users::table)
            .filter(user_subscriptions::feed_id.eq(feed_id))
            .filter(user_subscriptions::active.eq(true))
            .filter(users::is_archive.eq(true))
            .select(user_subscriptions::user_id)
            .limit(MAX_ARCHIVE_SUBSCRIBERS)
            .load(&mut conn)
            .await?
    };
    if subscriber_ids.is_empty() {
        return Ok(());
    }

    let now = Utc::now().naive_utc();
    let lookback = now - Duration::hours(CLUSTER_LOOKBACK_HOURS);
    let (lookback_ts, now_ts) = (
        lookback.and_utc().timestamp(),
        now.and_utc().timestamp(),
    );

    let story_hashes: Vec<String> = redis::cmd("ZRANGEBYSCORE")
        .arg(format!("zF:{feed_id}"))
        .arg(lookback_ts)
        .arg(now_ts)
        .query_async(&mut redis)
        .await?;
    if story_hashes.is_empty() {
        return Ok(());
    }

    // Skip stories already carrying a cluster assignment
    let mut pipe = redis::pipe();
    for hash in &story_hashes {
        pipe.get(format!("sCL:{hash}"));
    }
    let existing: Vec<Option<String>> = pipe.query_async(&mut redis).await?;
    let unclustered: Vec<String> = story_hashes
        .into_iter()
        .zip(existing)
        .filter_map(|(hash, cid)| cid.is_none().then_some(hash))
        .collect();
    if unclustered.is_empty() {
        return Ok(());
    }

    // Candidate pool: the union of the archive subscribers' other feeds
    let related_feed_ids: Vec<i32> = {
        use crate::schema::user_subscriptions;
        let mut ids: Vec<i32> = user_subscriptions::table
            .filter(user_subscriptions::user_id.eq_any(&subscriber_ids))
            .filter(user_subscriptions::active.eq(true))
            .filter(user_subscriptions::feed_id.ne(feed_id))
            .select(user_subscriptions::feed_id)
            .distinct()
            .load(&mut conn)
            .await?;
        ids.truncate(MAX_RELATED_FEEDS);
        ids
    };
    if related_feed_ids.is_empty() {
        return Ok(());
    }

    let mut pipe = redis::pipe();
    for fid in &related_feed_ids {
        pipe.cmd("ZRANGEBYSCORE")
            .arg(format!("zF:{fid}"))
            .arg(lookback_ts)
            .arg(now_ts);
    }
    let candidate_results: Vec<Vec<String>> = pipe.query_async(&mut redis).await?;

    let mut all_hashes: HashSet<String> = unclustered.iter().cloned().collect();
    for hashes in candidate_results {
        all_hashes.extend(hashes);
    }
    if all_hashes.len() < 2 {
        return Ok(());
    }

    let all_hashes: Vec<String> = all_hashes.into_iter().collect();
    let stories = load_story_meta(ctx, &all_hashes).await?;
    if stories.len() < 2 {
        return Ok(());
    }

    tracing::debug!(
        feed_id,
        unclustered = unclustered.len(),
        pool = stories.len(),
        "computing clusters"
    );

    let title_clusters = find_title_clusters(&stories);

    let mut resolved_feeds: HashMap<String, i32> = stories
        .iter()
        .map(|s| (s.story_hash.clone(), s.resolved_feed_id))
        .collect();
    let mut story_dates: HashMap<String, i64> = stories
        .iter()
        .map(|s| (s.story_hash.clone(), s.story_date))
        .collect();

    let semantic_clusters = match &ctx.semantic {
        Some(client) => {
            let unclustered_set: HashSet<&str> = unclustered.iter().map(|s| s.as_str()).collect();
            let targets: Vec<&StoryMeta> = stories
                .iter()
                .filter(|s| unclustered_set.contains(s.story_hash.as_str()))
                .collect();
            let feed_resolution = load_feed_resolution(ctx, &related_feed_ids).await?;
            find_semantic_clusters(client, &targets, &related_feed_ids, &feed_resolution, lookback)
                .await
        }
        None => HashMap::new(),
    };

    // Semantic hits may fall outside the candidate pool; backfill their
    // metadata so the merge can judge feed diversity.
    let unknown: Vec<String> = semantic_clusters
        .values()
        .flatten()
        .filter(|hash| !resolved_feeds.contains_key(*hash))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        for meta in load_story_meta(ctx, &unknown).await? {
            resolved_feeds.insert(meta.story_hash.clone(), meta.resolved_feed_id);
            story_dates.insert(meta.story_hash.clone(), meta.story_date);
        }
    }

    let clusters = merge_clusters(
        &[&title_clusters, &semantic_clusters],
        &resolved_feeds,
        &story_dates,
    );
    if clusters.is_empty() {
        return Ok(());
    }

    store_clusters_to_redis(&mut redis, &clusters).await?;
    usage::record_clusters(&mut redis, &clusters).await?;
    usage::record_timing(&mut redis, started.elapsed().as_millis() as u64).await?;

    tracing::debug!(
        feed_id,
        clusters = clusters.len(),
        stories = clusters.values().map(|m| m.len()).sum::<usize>(),
        "stored clusters"
    );
    Ok(())
}

/// Tier C: query the vector-search service per unclustered story and group
/// each story with its accepted hits. A connection failure abandons the
/// whole tier; per-story failures skip that story only.
async fn find_semantic_clusters(
    client: &SemanticSearchClient,
    stories: &[&StoryMeta],
    related_feed_ids: &[i32],
    feed_resolution: &HashMap<i32, i32>,
    lookback: NaiveDateTime,
) -> HashMap<String, Vec<String>> {
    let mut clusters: HashMap<String, Vec<String>> = HashMap::new();

    for story in stories {
        if story.story_title.trim().chars().count() < 10 {
            continue;
        }
        let search_feeds: Vec<i32> = related_feed_ids
            .iter()
            .copied()
            .filter(|fid| *fid != story.feed_id)
            .collect();
        if search_feeds.is_empty() {
            continue;
        }

        let hits = match client
            .similar_stories(&story.story_title, &search_feeds, lookback)
            .await
        {
            Ok(hits) => hits,
            Err(SemanticSearchError::Connection(err)) => {
                tracing::debug!(?err, "semantic search unreachable, skipping tier");
                return HashMap::new();
            }
            Err(SemanticSearchError::NotFound) => continue,
            Err(err) => {
                tracing::debug!(story_hash = %story.story_hash, ?err, "semantic search error");
                continue;
            }
        };

        let members: Vec<String> = hits
            .into_iter()
            .filter(|hit| hit.story_hash != story.story_hash)
            .filter(|hit| guid_hash_of(&hit.story_hash) != story.guid_hash())
            .filter(|hit| {
                // Branched copies of the trigger story's feed are the same
                // source, not corroboration
                hit.feed_id
                    .map(|fid| feed_resolution.get(&fid).copied().unwrap_or(fid))
                    != Some(story.resolved_feed_id)
            })
            .map(|hit| hit.story_hash)
            .collect();
        if members.is_empty() {
            continue;
        }

        let entry = clusters.entry(story.story_hash.clone()).or_default();
        entry.push(story.story_hash.clone());
        entry.extend(members);
    }

    clusters
}

async fn load_feed_resolution(
    ctx: &App,
    feed_ids: &[i32],
) -> Result<HashMap<i32, i32>, eyre::Error> {
    use crate::schema::feeds;

    let mut conn = ctx.diesel.get().await?;
    Ok(feeds::table
        .filter(feeds::id.eq_any(feed_ids))
        .select((feeds::id, feeds::branch_from_feed))
        .load::<(i32, Option<i32>)>(&mut conn)
        .await?
        .into_iter()
        .map(|(id, branch)| (id, branch.unwrap_or(id)))
        .collect())
}

async fn load_story_meta(ctx: &App, hashes: &[String]) -> Result<Vec<StoryMeta>, eyre::Error> {
    use crate::schema::{feeds, stories};

    let mut conn = ctx.diesel.get().await?;
    let mut rows: Vec<Story> = Vec::new();
    for batch in hashes.chunks(METADATA_BATCH_SIZE) {
        rows.extend(
            stories::table
                .filter(stories::story_hash.eq_any(batch))
                .select(Story::as_select())
                .load(&mut conn)
                .await?,
        );
    }

    let feed_ids: Vec<i32> = rows
        .iter()
        .map(|s| s.story_feed_id)
        .collect::<HashSet<i32>>()
        .into_iter()
        .collect();
    let resolution: HashMap<i32, i32> = feeds::table
        .filter(feeds::id.eq_any(&feed_ids))
        .select((feeds::id, feeds::branch_from_feed))
        .load::<(i32, Option<i32>)>(&mut conn)
        .await?
        .into_iter()
        .map(|(id, branch)| (id, branch.unwrap_or(id)))
        .collect();

    Ok(rows
        .into_iter()
        .map(|story| StoryMeta {
            resolved_feed_id: resolution
                .get(&story.story_feed_id)
                .copied()
                .unwrap_or(story.story_feed_id),
            feed_id: story.story_feed_id,
            story_date: story.story_date.and_utc().timestamp(),
            story_title: story.story_title,
            story_hash: story.story_hash,
        })
        .collect())
}

/// Write cluster memberships to Redis.
///
/// Keys:
///   sCL:{story_hash} -> cluster_id (string with TTL)
///   zCL:{cluster_id} -> sorted set of member hashes, score 0
///
/// The member set is deleted before repopulation so a shrunken recompute
/// cannot leave stale members behind.
pub async fn store_clusters_to_redis(
    redis: &mut ConnectionManager,
    clusters: &HashMap<String, Vec<String>>,
) -> Result<(), eyre::Error> {
    if clusters.is_empty() {
        return Ok(());
    }

    let mut pipe = redis::pipe();
    for (cluster_id, members) in clusters {
        let zkey = format!("zCL:{cluster_id}");
        pipe.del(&zkey);
        for story_hash in members {
            pipe.set_ex(format!("sCL:{story_hash}"), cluster_id, CLUSTER_TTL_SECONDS);
        }
        for story_hash in members {
            pipe.zadd(&zkey, story_hash, 0);
        }
        pipe.expire(&zkey, CLUSTER_TTL_SECONDS as i64);
    }
    pipe.query_async::<()>(redis).await?;
    Ok(())
}

pub async fn get_cluster_for_story(
    redis: &mut ConnectionManager,
    story_hash: &str,
) -> Result<Option<String>, eyre::Error> {
    Ok(redis::cmd("GET")
        .arg(format!("sCL:{story_hash}"))
        .query_async(redis)
        .await?)
}

pub async fn get_cluster_members(
    redis: &mut ConnectionManager,
    cluster_id: &str,
) -> Result<Vec<String>, eyre::Error> {
    Ok(redis::cmd("ZRANGE")
        .arg(format!("zCL:{cluster_id}"))
        .arg(0)
        .arg(-1)
        .query_async(redis)
        .await?)
}

/// When a clustered story is marked read, the rest of its cluster is marked
/// read with it. Returns the sibling hashes and records the expansion.
pub async fn mark_read_cluster_expansion(
    redis: &mut ConnectionManager,
    story_hash: &str,
) -> Result<Vec<String>, eyre::Error> {
    let Some(cluster_id) = get_cluster_for_story(redis, story_hash).await? else {
        return Ok(Vec::new());
    };
    let siblings: Vec<String> = get_cluster_members(redis, &cluster_id)
        .await?
        .into_iter()
        .filter(|member| member != story_hash)
        .collect();
    usage::record_mark_read(redis, siblings.len() as u64).await?;
    Ok(siblings)
}

/// One story on a river page, after scoring. `cluster_stories` is attached
/// only to cluster representatives; consumers must treat a missing and an
/// empty slice identically.
#[derive(Debug, Clone, Serialize)]
pub struct PageStory {
    pub story_hash: String,
    pub story_feed_id: i32,
    pub story_title: String,
    pub feed_title: String,
    pub story_date: Option<NaiveDateTime>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_stories: Option<Vec<ClusterStory>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClusterStory {
    pub story_hash: String,
    pub story_feed_id: i32,
    pub story_title: String,
    pub story_date: String,
    pub story_timestamp: String,
    pub feed_title: String,
}

impl ClusterStory {
    fn from_page_story(story: &PageStory) -> Self {
        Self {
            story_hash: story.story_hash.clone(),
            story_feed_id: story.story_feed_id,
            story_title: story.story_title.clone(),
            story_date: story
                .story_date
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
            story_timestamp: story
                .story_date
                .map(|d| d.and_utc().timestamp().to_string())
                .unwrap_or_default(),
            feed_title: story.feed_title.clone(),
        }
    }
}

/// Collapse clustered stories on a scored river page. The highest-scoring
/// on-page member represents its cluster; other on-page members are removed
/// and every other member is attached as sidecar metadata.
pub async fn apply_clustering_to_stories(
    ctx: &App,
    user_id: i32,
    stories: Vec<PageStory>,
) -> Result<Vec<PageStory>, eyre::Error> {
    if stories.is_empty() {
        return Ok(stories);
    }

    let mut redis = ctx.redis.clone();

    let mut pipe = redis::pipe();
    for story in &stories {
        pipe.get(format!("sCL:{}", story.story_hash));
    }
    let cluster_ids: Vec<Option<String>> = pipe.query_async(&mut redis).await?;

    let mut hash_to_cluster: HashMap<String, String> = HashMap::new();
    let mut unique_cluster_ids: HashSet<String> = HashSet::new();
    for (story, cid) in stories.iter().zip(cluster_ids) {
        if let Some(cid) = cid {
            hash_to_cluster.insert(story.story_hash.clone(), cid.clone());
            unique_cluster_ids.insert(cid);
        }
    }
    if hash_to_cluster.is_empty() {
        return Ok(stories);
    }

    let unique_cluster_ids: Vec<String> = unique_cluster_ids.into_iter().collect();
    let mut pipe = redis::pipe();
    for cid in &unique_cluster_ids {
        pipe.cmd("ZRANGE").arg(format!("zCL:{cid}")).arg(0).arg(-1);
    }
    let member_results: Vec<Vec<String>> = pipe.query_async(&mut redis).await?;
    let cluster_members: HashMap<String, Vec<String>> = unique_cluster_ids
        .into_iter()
        .zip(member_results)
        .collect();

    // Off-page members need metadata, restricted to feeds the user follows
    let page_hashes: HashSet<&str> = stories.iter().map(|s| s.story_hash.as_str()).collect();
    let off_page_hashes: Vec<String> = cluster_members
        .values()
        .flatten()
        .filter(|hash| !page_hashes.contains(hash.as_str()))
        .cloned()
        .collect();
    let off_page = load_off_page_members(ctx, user_id, &off_page_hashes).await?;

    let result = apply_cluster_layout(stories, &hash_to_cluster, &cluster_members, &off_page);
    Ok(result)
}

async fn load_off_page_members(
    ctx: &App,
    user_id: i32,
    hashes: &[String],
) -> Result<HashMap<String, ClusterStory>, eyre::Error> {
    use crate::schema::{feeds, stories, user_subscriptions};

    if hashes.is_empty() {
        return Ok(HashMap::new());
    }
    let mut conn = ctx.diesel.get().await?;

    let active_feeds: HashSet<i32> = user_subscriptions::table
        .filter(user_subscriptions::user_id.eq(user_id))
        .filter(user_subscriptions::active.eq(true))
        .select(user_subscriptions::feed_id)
        .load::<i32>(&mut conn)
        .await?
        .into_iter()
        .collect();

    let mut rows: Vec<Story> = Vec::new();
    for batch in hashes.chunks(METADATA_BATCH_SIZE) {
        rows.extend(
            stories::table
                .filter(stories::story_hash.eq_any(batch))
                .select(Story::as_select())
                .load(&mut conn)
                .await?,
        );
    }
    rows.retain(|story| active_feeds.contains(&story.story_feed_id));

    let feed_ids: Vec<i32> = rows
        .iter()
        .map(|s| s.story_feed_id)
        .collect::<HashSet<i32>>()
        .into_iter()
        .collect();
    let feed_titles: HashMap<i32, String> = feeds::table
        .filter(feeds::id.eq_any(&feed_ids))
        .select((feeds::id, feeds::feed_title))
        .load::<(i32, String)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    Ok(rows
        .into_iter()
        .map(|story| {
            (
                story.story_hash.clone(),
                ClusterStory {
                    feed_title: feed_titles
                        .get(&story.story_feed_id)
                        .cloned()
                        .unwrap_or_default(),
                    story_date: story.story_date.format("%Y-%m-%d %H:%M").to_string(),
                    story_timestamp: story.story_date.and_utc().timestamp().to_string(),
                    story_feed_id: story.story_feed_id,
                    story_title: story.story_title,
                    story_hash: story.story_hash,
                },
            )
        })
        .collect())
}

/// Pure page-rewrite rules, split out from the Redis/database plumbing.
fn apply_cluster_layout(
    stories: Vec<PageStory>,
    hash_to_cluster: &HashMap<String, String>,
    cluster_members: &HashMap<String, Vec<String>>,
    off_page: &HashMap<String, ClusterStory>,
) -> Vec<PageStory> {
    let page_by_hash: HashMap<String, PageStory> = stories
        .iter()
        .map(|s| (s.story_hash.clone(), s.clone()))
        .collect();

    // Group page stories by cluster
    let mut cluster_page_stories: HashMap<&str, Vec<&PageStory>> = HashMap::new();
    for story in &stories {
        if let Some(cid) = hash_to_cluster.get(&story.story_hash) {
            cluster_page_stories
                .entry(cid.as_str())
                .or_default()
                .push(story);
        }
    }

    let mut removed: HashSet<String> = HashSet::new();
    let mut sidecars: HashMap<String, Vec<ClusterStory>> = HashMap::new();

    for (cid, mut page_group) in cluster_page_stories {
        let Some(all_members) = cluster_members.get(cid) else {
            continue;
        };
        if all_members.len() < 2 {
            continue;
        }

        page_group.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let representative = page_group[0];
        for other in &page_group[1..] {
            removed.insert(other.story_hash.clone());
        }

        // Sidecars cover every other member, deduplicated by guid including
        // the representative's own
        let mut seen_guids: HashSet<&str> = HashSet::new();
        seen_guids.insert(guid_hash_of(&representative.story_hash));
        let mut cluster_stories = Vec::new();
        for member_hash in all_members {
            if member_hash == &representative.story_hash {
                continue;
            }
            if !seen_guids.insert(guid_hash_of(member_hash)) {
                continue;
            }
            if let Some(on_page) = page_by_hash.get(member_hash) {
                cluster_stories.push(ClusterStory::from_page_story(on_page));
            } else if let Some(meta) = off_page.get(member_hash) {
                cluster_stories.push(meta.clone());
            }
        }

        if !cluster_stories.is_empty() {
            sidecars.insert(representative.story_hash.clone(), cluster_stories);
        }
    }

    stories
        .into_iter()
        .filter(|story| !removed.contains(&story.story_hash))
        .map(|mut story| {
            if let Some(cluster_stories) = sidecars.remove(&story.story_hash) {
                story.cluster_stories = Some(cluster_stories);
            }
            story
        })
        .collect()
}

async fn clustering_metrics(State(ctx): State<App>) -> Result<String, AppError> {
    let mut redis = ctx.redis.clone();
    let daily = usage::get_period_stats(&mut redis, 1).await?;
    let weekly = usage::get_period_stats(&mut redis, 7).await?;
    let monthly = usage::get_period_stats(&mut redis, 30).await?;
    let alltime = usage::get_alltime_stats(&mut redis).await?;

    let mut lines = Vec::new();
    for (period, stats) in [
        ("daily", &daily),
        ("weekly", &weekly),
        ("monthly", &monthly),
        ("alltime", &alltime),
    ] {
        for (metric, value) in [
            ("clusters_found", stats.clusters_found),
            ("stories_clustered", stats.stories_clustered),
            ("mark_read_expanded", stats.mark_read_expanded),
            ("cluster_time_avg_ms", stats.cluster_time_avg_ms()),
        ] {
            lines.push(metrics_line(
                "clustering",
                &[("metric", metric), ("period", period)],
                value,
            ));
        }
    }
    Ok(lines.join("\n") + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_story(hash: &str, feed_id: i32, score: f64) -> PageStory {
        PageStory {
            story_hash: hash.to_string(),
            story_feed_id: feed_id,
            story_title: format!("Story {hash}"),
            feed_title: format!("Feed {feed_id}"),
            story_date: None,
            score,
            cluster_stories: None,
        }
    }

    fn off_page_story(hash: &str, feed_id: i32) -> ClusterStory {
        ClusterStory {
            story_hash: hash.to_string(),
            story_feed_id: feed_id,
            story_title: format!("Story {hash}"),
            story_date: String::new(),
            story_timestamp: String::new(),
            feed_title: format!("Feed {feed_id}"),
        }
    }

    #[test]
    fn representative_is_highest_scoring_on_page() {
        let stories = vec![
            page_story("1:aaa", 1, 0.5),
            page_story("2:bbb", 2, 0.9),
            page_story("3:ccc", 3, 0.1),
        ];
        let hash_to_cluster = HashMap::from([
            ("1:aaa".to_string(), "1:aaa".to_string()),
            ("2:bbb".to_string(), "1:aaa".to_string()),
        ]);
        let members = HashMap::from([(
            "1:aaa".to_string(),
            vec!["1:aaa".to_string(), "2:bbb".to_string()],
        )]);

        let result = apply_cluster_layout(stories, &hash_to_cluster, &members, &HashMap::new());

        assert_eq!(result.len(), 2);
        let rep = result.iter().find(|s| s.story_hash == "2:bbb").unwrap();
        let sidecars = rep.cluster_stories.as_ref().unwrap();
        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars[0].story_hash, "1:aaa");
        assert!(!result.iter().any(|s| s.story_hash == "1:aaa"));
        // Unclustered story untouched
        let lone = result.iter().find(|s| s.story_hash == "3:ccc").unwrap();
        assert!(lone.cluster_stories.is_none());
    }

    #[test]
    fn off_page_members_attach_as_sidecars() {
        let stories = vec![page_story("1:aaa", 1, 0.5)];
        let hash_to_cluster = HashMap::from([("1:aaa".to_string(), "1:aaa".to_string())]);
        let members = HashMap::from([(
            "1:aaa".to_string(),
            vec!["1:aaa".to_string(), "4:ddd".to_string()],
        )]);
        let off_page = HashMap::from([("4:ddd".to_string(), off_page_story("4:ddd", 4))]);

        let result = apply_cluster_layout(stories, &hash_to_cluster, &members, &off_page);
        let sidecars = result[0].cluster_stories.as_ref().unwrap();
        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars[0].story_hash, "4:ddd");
    }

    #[test]
    fn sidecars_dedup_by_guid_including_representative() {
        let stories = vec![page_story("1:aaa", 1, 0.5)];
        let hash_to_cluster = HashMap::from([("1:aaa".to_string(), "1:aaa".to_string())]);
        // 2:aaa shares the representative's guid; 4:ddd and 5:ddd share one
        let members = HashMap::from([(
            "1:aaa".to_string(),
            vec![
                "1:aaa".to_string(),
                "2:aaa".to_string(),
                "4:ddd".to_string(),
                "5:ddd".to_string(),
            ],
        )]);
        let off_page = HashMap::from([
            ("2:aaa".to_string(), off_page_story("2:aaa", 2)),
            ("4:ddd".to_string(), off_page_story("4:ddd", 4)),
            ("5:ddd".to_string(), off_page_story("5:ddd", 5)),
        ]);

        let result = apply_cluster_layout(stories, &hash_to_cluster, &members, &off_page);
        let sidecars = result[0].cluster_stories.as_ref().unwrap();
        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars[0].story_hash, "4:ddd");
    }

    #[test]
    fn degenerate_cluster_leaves_page_alone() {
        let stories = vec![page_story("1:aaa", 1, 0.5)];
        let hash_to_cluster = HashMap::from([("1:aaa".to_string(), "1:aaa".to_string())]);
        let members = HashMap::from([("1:aaa".to_string(), vec!["1:aaa".to_string()])]);

        let result = apply_cluster_layout(stories, &hash_to_cluster, &members, &HashMap::new());
        assert_eq!(result.len(), 1);
        assert!(result[0].cluster_stories.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn store_and_read_back_clusters() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();

        let clusters = HashMap::from([(
            "t1:aaa".to_string(),
            vec!["t1:aaa".to_string(), "t2:bbb".to_string()],
        )]);
        store_clusters_to_redis(&mut conn, &clusters).await.unwrap();

        let cid = get_cluster_for_story(&mut conn, "t2:bbb").await.unwrap();
        assert_eq!(cid.as_deref(), Some("t1:aaa"));
        let members = get_cluster_members(&mut conn, "t1:aaa").await.unwrap();
        assert_eq!(members.len(), 2);

        // Both key kinds carry the 14-day TTL
        let ttl: i64 = redis::cmd("TTL")
            .arg("sCL:t1:aaa")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl <= CLUSTER_TTL_SECONDS as i64);
        let ttl: i64 = redis::cmd("TTL")
            .arg("zCL:t1:aaa")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(ttl > 0 && ttl <= CLUSTER_TTL_SECONDS as i64);
    }
}
