//! Redis-backed clustering usage counters feeding the metrics endpoint.
//!
//! Key structure:
//! - `clustering:cids:{date}` / `clustering:sids:{date}` — dedup sets of
//!   cluster ids / clustered story hashes seen that day (35 day TTL)
//! - `clustering:{date}:mark_read_expanded` — stories auto-marked read via
//!   cluster expansion
//! - `clustering:{date}:cluster_time_total_ms` / `:cluster_time_count` —
//!   run duration sums for average latency
//! - `clustering:alltime:*` — cumulative counters, no expiry

use std::collections::HashMap;

use chrono::{Duration, Utc};
use redis::aio::ConnectionManager;

const KEY_PREFIX: &str = "clustering";
const KEY_EXPIRY_SECONDS: i64 = 35 * 24 * 60 * 60;

fn date_key(days_ago: i64) -> String {
    (Utc::now().date_naive() - Duration::days(days_ago))
        .format("%Y-%m-%d")
        .to_string()
}

#[derive(Debug, Default, Clone)]
pub struct ClusteringStats {
    pub clusters_found: u64,
    pub stories_clustered: u64,
    pub mark_read_expanded: u64,
    pub cluster_time_total_ms: u64,
    pub cluster_time_count: u64,
}

impl ClusteringStats {
    pub fn cluster_time_avg_ms(&self) -> u64 {
        if self.cluster_time_count == 0 {
            return 0;
        }
        (self.cluster_time_total_ms as f64 / self.cluster_time_count as f64).round() as u64
    }
}

/// Record freshly stored clusters. Daily sets deduplicate re-clustered ids;
/// the alltime counters advance only by what was new today.
pub async fn record_clusters(
    redis: &mut ConnectionManager,
    clusters: &HashMap<String, Vec<String>>,
) -> eyre::Result<()> {
    if clusters.is_empty() {
        return Ok(());
    }
    let date = date_key(0);
    let cids_key = format!("{KEY_PREFIX}:cids:{date}");
    let sids_key = format!("{KEY_PREFIX}:sids:{date}");

    let mut pipe = redis::pipe();
    for (cluster_id, members) in clusters {
        pipe.sadd(&cids_key, cluster_id);
        for story_hash in members {
            pipe.sadd(&sids_key, story_hash);
        }
    }
    let added: Vec<i64> = pipe.query_async(redis).await?;

    let mut new_clusters = 0i64;
    let mut new_stories = 0i64;
    let mut i = 0;
    for members in clusters.values() {
        new_clusters += added[i];
        i += 1;
        for _ in members {
            new_stories += added[i];
            i += 1;
        }
    }

    redis::pipe()
        .expire(&cids_key, KEY_EXPIRY_SECONDS)
        .expire(&sids_key, KEY_EXPIRY_SECONDS)
        .cmd("INCRBY")
        .arg(format!("{KEY_PREFIX}:alltime:clusters_found"))
        .arg(new_clusters)
        .cmd("INCRBY")
        .arg(format!("{KEY_PREFIX}:alltime:stories_clustered"))
        .arg(new_stories)
        .query_async::<()>(redis)
        .await?;

    Ok(())
}

/// Record extra stories marked read through cluster expansion.
pub async fn record_mark_read(redis: &mut ConnectionManager, count: u64) -> eyre::Result<()> {
    if count == 0 {
        return Ok(());
    }
    let daily = format!("{}:{}:mark_read_expanded", KEY_PREFIX, date_key(0));
    redis::pipe()
        .cmd("INCRBY")
        .arg(&daily)
        .arg(count)
        .expire(&daily, KEY_EXPIRY_SECONDS)
        .cmd("INCRBY")
        .arg(format!("{KEY_PREFIX}:alltime:mark_read_expanded"))
        .arg(count)
        .query_async::<()>(redis)
        .await?;
    Ok(())
}

/// Record one clustering run's duration.
pub async fn record_timing(redis: &mut ConnectionManager, duration_ms: u64) -> eyre::Result<()> {
    let date = date_key(0);
    let total = format!("{KEY_PREFIX}:{date}:cluster_time_total_ms");
    let count = format!("{KEY_PREFIX}:{date}:cluster_time_count");
    redis::pipe()
        .cmd("INCRBY")
        .arg(&total)
        .arg(duration_ms)
        .cmd("INCR")
        .arg(&count)
        .expire(&total, KEY_EXPIRY_SECONDS)
        .expire(&count, KEY_EXPIRY_SECONDS)
        .cmd("INCRBY")
        .arg(format!("{KEY_PREFIX}:alltime:cluster_time_total_ms"))
        .arg(duration_ms)
        .cmd("INCR")
        .arg(format!("{KEY_PREFIX}:alltime:cluster_time_count"))
        .query_async::<()>(redis)
        .await?;
    Ok(())
}

/// Aggregate counts over the last `days` days. Cluster and story counts come
/// from set unions so a cluster recomputed on two days counts once.
pub async fn get_period_stats(
    redis: &mut ConnectionManager,
    days: i64,
) -> eyre::Result<ClusteringStats> {
    let mut cids_keys = Vec::new();
    let mut sids_keys = Vec::new();
    let mut counter_keys = Vec::new();
    for day in 0..days {
        let date = date_key(day);
        cids_keys.push(format!("{KEY_PREFIX}:cids:{date}"));
        sids_keys.push(format!("{KEY_PREFIX}:sids:{date}"));
        counter_keys.push(format!("{KEY_PREFIX}:{date}:mark_read_expanded"));
        counter_keys.push(format!("{KEY_PREFIX}:{date}:cluster_time_total_ms"));
        counter_keys.push(format!("{KEY_PREFIX}:{date}:cluster_time_count"));
    }

    let (cluster_ids, story_ids, counters): (Vec<String>, Vec<String>, Vec<Option<u64>>) =
        redis::pipe()
            .cmd("SUNION")
            .arg(&cids_keys)
            .cmd("SUNION")
            .arg(&sids_keys)
            .cmd("MGET")
            .arg(&counter_keys)
            .query_async(redis)
            .await?;

    let mut stats = ClusteringStats {
        clusters_found: cluster_ids.len() as u64,
        stories_clustered: story_ids.len() as u64,
        ..Default::default()
    };
    for chunk in counters.chunks(3) {
        stats.mark_read_expanded += chunk.first().copied().flatten().unwrap_or(0);
        stats.cluster_time_total_ms += chunk.get(1).copied().flatten().unwrap_or(0);
        stats.cluster_time_count += chunk.get(2).copied().flatten().unwrap_or(0);
    }
    Ok(stats)
}

pub async fn get_alltime_stats(redis: &mut ConnectionManager) -> eyre::Result<ClusteringStats> {
    let keys = [
        format!("{KEY_PREFIX}:alltime:clusters_found"),
        format!("{KEY_PREFIX}:alltime:stories_clustered"),
        format!("{KEY_PREFIX}:alltime:mark_read_expanded"),
        format!("{KEY_PREFIX}:alltime:cluster_time_total_ms"),
        format!("{KEY_PREFIX}:alltime:cluster_time_count"),
    ];
    let values: Vec<Option<u64>> = redis::cmd("MGET").arg(&keys).query_async(redis).await?;
    Ok(ClusteringStats {
        clusters_found: values.first().copied().flatten().unwrap_or(0),
        stories_clustered: values.get(1).copied().flatten().unwrap_or(0),
        mark_read_expanded: values.get(2).copied().flatten().unwrap_or(0),
        cluster_time_total_ms: values.get(3).copied().flatten().unwrap_or(0),
        cluster_time_count: values.get(4).copied().flatten().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_rounds_and_handles_zero() {
        let stats = ClusteringStats {
            cluster_time_total_ms: 100,
            cluster_time_count: 3,
            ..Default::default()
        };
        assert_eq!(stats.cluster_time_avg_ms(), 33);
        assert_eq!(ClusteringStats::default().cluster_time_avg_ms(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis server
    async fn record_and_aggregate_round_trip() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();

        let clusters = HashMap::from([(
            "1:aaa".to_string(),
            vec!["1:aaa".to_string(), "2:bbb".to_string()],
        )]);
        record_clusters(&mut conn, &clusters).await.unwrap();
        record_timing(&mut conn, 42).await.unwrap();

        let stats = get_period_stats(&mut conn, 1).await.unwrap();
        assert!(stats.clusters_found >= 1);
        assert!(stats.stories_clustered >= 2);
        assert!(stats.cluster_time_count >= 1);
    }
}
