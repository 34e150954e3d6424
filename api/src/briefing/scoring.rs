//! Briefing candidate selection: enumerate recent stories from a user's
//! subscriptions, weigh them, and hand an ordered, categorized list to the
//! summary orchestrator.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::App;
use crate::briefing::models::ReadFilter;
use crate::clustering::similarity::{TITLE_MIN_LENGTH, normalize_title};
use crate::models::classifier::{Classifier, KIND_AUTHOR, KIND_FEED, KIND_TAG, KIND_TITLE};
use crate::models::story::Story;

pub const MAX_PER_FEED: usize = 3;
/// Below this many unread candidates, read stories stay in as fallback.
pub const UNREAD_FALLBACK_THRESHOLD: usize = 3;
/// A story is a long read when it clears the page median and this floor.
const LONG_READ_MIN_WORDS: usize = 600;
const EXCERPT_CHARS: usize = 300;

// Score weights, roughly ordered by how strong a signal each is
const WEIGHT_CLASSIFIER: f64 = 2.0;
const WEIGHT_FEED_TRENDING: f64 = 1.5;
const WEIGHT_GLOBAL_TRENDING: f64 = 1.0;
const WEIGHT_UNREAD: f64 = 1.0;
const WEIGHT_FOLLOW_UP: f64 = 0.75;
const WEIGHT_WORD_BUCKET: f64 = 0.25;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredStory {
    pub story_hash: String,
    pub score: f64,
    pub is_read: bool,
    pub category: String,
    pub content_word_count: usize,
    pub classifier_matches: Vec<String>,
}

/// One candidate with every feature the ranking needs.
#[derive(Debug, Clone)]
struct Candidate {
    story_hash: String,
    feed_id: i32,
    date_ts: i64,
    is_read: bool,
    word_count: usize,
    classifier_matches: Vec<String>,
    custom_section: Option<usize>,
    in_cluster: bool,
    feed_trending: f64,
    global_trending: f64,
    feed_recently_read: bool,
}

/// First matching rule wins; every candidate lands in exactly one section.
fn categorize(candidate: &Candidate, median_word_count: usize) -> String {
    if !candidate.classifier_matches.is_empty() {
        return "classifier_match".to_string();
    }
    if let Some(slot) = candidate.custom_section {
        return format!("custom_{slot}");
    }
    if candidate.in_cluster {
        return "duplicates".to_string();
    }
    if candidate.word_count >= LONG_READ_MIN_WORDS.max(median_word_count) {
        return "long_read".to_string();
    }
    if candidate.feed_recently_read {
        return "follow_up".to_string();
    }
    if candidate.feed_trending > 0.0 {
        return "trending_unread".to_string();
    }
    "trending_global".to_string()
}

fn score(candidate: &Candidate) -> f64 {
    let mut score = 0.0;
    if candidate.global_trending > 0.0 {
        score += WEIGHT_GLOBAL_TRENDING;
    }
    if candidate.feed_trending > 0.0 {
        score += WEIGHT_FEED_TRENDING;
    }
    if !candidate.classifier_matches.is_empty() {
        score += WEIGHT_CLASSIFIER;
    }
    if candidate.feed_recently_read {
        score += WEIGHT_FOLLOW_UP;
    }
    if !candidate.is_read {
        score += WEIGHT_UNREAD;
    }
    let word_bucket = (candidate.word_count / 400).min(3) as f64;
    score + WEIGHT_WORD_BUCKET * word_bucket
}

/// Median word count over the page; the long-read threshold is relative to
/// what the user's feeds actually publish.
fn median_word_count(candidates: &[Candidate]) -> usize {
    if candidates.is_empty() {
        return 0;
    }
    let mut counts: Vec<usize> = candidates.iter().map(|c| c.word_count).collect();
    counts.sort_unstable();
    counts[(counts.len() - 1) / 2]
}

/// Drop read candidates when enough unread ones exist; otherwise keep read
/// stories as fallback so sparse feeds still produce a briefing.
fn apply_read_filter(candidates: Vec<Candidate>, read_filter: ReadFilter) -> Vec<Candidate> {
    if read_filter == ReadFilter::All {
        return candidates;
    }
    let unread = candidates.iter().filter(|c| !c.is_read).count();
    if unread >= UNREAD_FALLBACK_THRESHOLD {
        candidates.into_iter().filter(|c| !c.is_read).collect()
    } else {
        candidates
    }
}

/// Sort by score (ties to newer stories), cap stories per feed, truncate.
fn rank_candidates(mut candidates: Vec<Candidate>, max_stories: usize) -> Vec<ScoredStory> {
    let median = median_word_count(&candidates);
    candidates.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.date_ts.cmp(&a.date_ts))
    });

    let mut per_feed: HashMap<i32, usize> = HashMap::new();
    let mut selected = Vec::new();
    for candidate in candidates {
        let taken = per_feed.entry(candidate.feed_id).or_insert(0);
        if *taken >= MAX_PER_FEED {
            continue;
        }
        *taken += 1;

        selected.push(ScoredStory {
            score: score(&candidate),
            category: categorize(&candidate, median),
            story_hash: candidate.story_hash,
            is_read: candidate.is_read,
            content_word_count: candidate.word_count,
            classifier_matches: candidate.classifier_matches,
        });
        if selected.len() >= max_stories {
            break;
        }
    }
    selected
}

/// Classifier hits for one story, formatted `kind:value` for the prompt
/// pills. Only positively scored classifiers match.
fn get_classifier_matches(
    story: &Story,
    classifiers: &[Classifier],
    feed_titles: &HashMap<i32, String>,
) -> Vec<String> {
    let mut matches = Vec::new();
    for classifier in classifiers {
        if classifier.score <= 0 {
            continue;
        }
        if let Some(feed_id) = classifier.feed_id {
            if classifier.kind != KIND_FEED && feed_id != story.story_feed_id {
                continue;
            }
        }
        match classifier.kind.as_str() {
            KIND_FEED => {
                if classifier.feed_id == Some(story.story_feed_id) {
                    let title = feed_titles
                        .get(&story.story_feed_id)
                        .cloned()
                        .unwrap_or_else(|| classifier.value.clone());
                    matches.push(format!("feed:{title}"));
                }
            }
            KIND_AUTHOR => {
                if story
                    .story_author
                    .as_deref()
                    .is_some_and(|author| author.eq_ignore_ascii_case(&classifier.value))
                {
                    matches.push(format!("author:{}", classifier.value));
                }
            }
            KIND_TAG => {
                if story
                    .story_tags
                    .iter()
                    .any(|tag| tag.eq_ignore_ascii_case(&classifier.value))
                {
                    matches.push(format!("tag:{}", classifier.value));
                }
            }
            KIND_TITLE => {
                if story
                    .story_title
                    .to_lowercase()
                    .contains(&classifier.value.to_lowercase())
                {
                    matches.push(format!("title:{}", classifier.value));
                }
            }
            _ => {}
        }
    }
    matches
}

/// Page-level duplicate detection by exact normalized title across feeds,
/// for candidates the clustering engine hasn't indexed yet.
fn find_duplicate_stories(candidates: &[(String, i32, String)]) -> HashSet<String> {
    let mut groups: HashMap<String, Vec<(usize, i32)>> = HashMap::new();
    for (idx, (_, feed_id, title)) in candidates.iter().enumerate() {
        let norm = normalize_title(title);
        if norm.chars().count() < TITLE_MIN_LENGTH {
            continue;
        }
        groups.entry(norm).or_default().push((idx, *feed_id));
    }

    let mut duplicates = HashSet::new();
    for group in groups.values() {
        let feeds: HashSet<i32> = group.iter().map(|(_, fid)| *fid).collect();
        if feeds.len() < 2 {
            continue;
        }
        for (idx, _) in group {
            duplicates.insert(candidates[*idx].0.clone());
        }
    }
    duplicates
}

/// First custom keyword prompt with a hit against title or excerpt; slots
/// are 1-based.
fn match_custom_section(
    prompts: &[String],
    title: &str,
    excerpt: &str,
    enabled: impl Fn(usize) -> bool,
) -> Option<usize> {
    let haystack = format!("{} {}", title, excerpt).to_lowercase();
    for (i, prompt) in prompts.iter().enumerate() {
        let slot = i + 1;
        if !enabled(slot) {
            continue;
        }
        let matched = prompt
            .split(',')
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .any(|keyword| haystack.contains(&keyword));
        if matched {
            return Some(slot);
        }
    }
    None
}

pub struct SelectOptions<'a> {
    pub max_stories: usize,
    pub read_filter: ReadFilter,
    pub source_folder: Option<&'a str>,
    pub custom_prompts: &'a [String],
    pub enabled_sections: &'a HashMap<String, bool>,
}

impl Default for SelectOptions<'_> {
    fn default() -> Self {
        static EMPTY_PROMPTS: &[String] = &[];
        static EMPTY_SECTIONS: std::sync::LazyLock<HashMap<String, bool>> =
            std::sync::LazyLock::new(HashMap::new);
        Self {
            max_stories: 5,
            read_filter: ReadFilter::default(),
            source_folder: None,
            custom_prompts: EMPTY_PROMPTS,
            enabled_sections: &*EMPTY_SECTIONS,
        }
    }
}

/// Turn a user's subscriptions into a ranked, categorized candidate list
/// over `[period_start, now]`. An empty result is valid and short-circuits
/// the briefing worker.
#[tracing::instrument(skip(ctx, options))]
pub async fn select_briefing_stories(
    ctx: &App,
    user_id: i32,
    period_start: NaiveDateTime,
    now: NaiveDateTime,
    options: SelectOptions<'_>,
) -> Result<Vec<ScoredStory>, eyre::Error> {
    use crate::schema::{classifiers, feeds, stories, user_subscriptions};

    let mut conn = ctx.diesel.get().await?;
    let mut redis = ctx.redis.clone();

    let user_classifiers: Vec<Classifier> = classifiers::table
        .filter(classifiers::user_id.eq(user_id))
        .select(Classifier::as_select())
        .load(&mut conn)
        .await?;

    // Active feeds, optionally scoped to a folder or (focus mode) to feeds
    // the user has trained positively
    let mut feed_query = user_subscriptions::table
        .filter(user_subscriptions::user_id.eq(user_id))
        .filter(user_subscriptions::active.eq(true))
        .select(user_subscriptions::feed_id)
        .into_boxed();
    if let Some(folder) = options.source_folder {
        feed_query = feed_query.filter(user_subscriptions::folder.eq(folder.to_string()));
    }
    let mut feed_ids: Vec<i32> = feed_query.load(&mut conn).await?;

    if options.read_filter == ReadFilter::Focus {
        let focused: HashSet<i32> = user_classifiers
            .iter()
            .filter(|c| c.kind == KIND_FEED && c.score > 0)
            .filter_map(|c| c.feed_id)
            .collect();
        feed_ids.retain(|fid| focused.contains(fid));
    }
    if feed_ids.is_empty() {
        return Ok(Vec::new());
    }

    // Recent story hashes per feed from the publish-time index
    let (start_ts, now_ts) = (
        period_start.and_utc().timestamp(),
        now.and_utc().timestamp(),
    );
    let mut pipe = redis::pipe();
    for fid in &feed_ids {
        pipe.cmd("ZRANGEBYSCORE")
            .arg(format!("zF:{fid}"))
            .arg(start_ts)
            .arg(now_ts);
    }
    let per_feed_hashes: Vec<Vec<String>> = pipe.query_async(&mut redis).await?;
    let story_hashes: Vec<String> = per_feed_hashes.into_iter().flatten().collect();
    if story_hashes.is_empty() {
        return Ok(Vec::new());
    }

    // Read-state: one membership check per hash. Errors here surface; a
    // briefing built on wrong read-state is worse than none.
    let mut pipe = redis::pipe();
    for hash in &story_hashes {
        pipe.cmd("SISMEMBER").arg(format!("RS:{user_id}")).arg(hash);
    }
    let read_flags: Vec<bool> = pipe.query_async(&mut redis).await?;
    let read_state: HashMap<&str, bool> = story_hashes
        .iter()
        .map(|h| h.as_str())
        .zip(read_flags)
        .collect();

    // Feeds the user read from recently power the follow_up category
    let recently_read_feeds: HashSet<i32> = story_hashes
        .iter()
        .filter(|hash| read_state.get(hash.as_str()).copied().unwrap_or(false))
        .filter_map(|hash| hash.split_once(':'))
        .filter_map(|(feed, _)| feed.parse().ok())
        .collect();

    // Story metadata in batches
    let mut story_rows: Vec<Story> = Vec::new();
    for batch in story_hashes.chunks(100) {
        story_rows.extend(
            stories::table
                .filter(stories::story_hash.eq_any(batch))
                .select(Story::as_select())
                .load(&mut conn)
                .await?,
        );
    }
    if story_rows.is_empty() {
        return Ok(Vec::new());
    }

    let feed_titles: HashMap<i32, String> = feeds::table
        .filter(feeds::id.eq_any(&feed_ids))
        .select((feeds::id, feeds::feed_title))
        .load::<(i32, String)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    // Trending scores degrade to zero on any failure
    let global_trending = trending_scores(&mut redis, "zTG", &story_hashes)
        .await
        .unwrap_or_default();
    let mut feed_trending: HashMap<String, f64> = HashMap::new();
    for fid in &feed_ids {
        let key = format!("zTF:{fid}");
        if let Ok(scores) = trending_scores(&mut redis, &key, &story_hashes).await {
            feed_trending.extend(scores);
        }
    }

    // Cluster membership marks cross-feed duplicates
    let mut pipe = redis::pipe();
    for story in &story_rows {
        pipe.get(format!("sCL:{}", story.story_hash));
    }
    let cluster_ids: Vec<Option<String>> = pipe.query_async(&mut redis).await.unwrap_or_default();
    let clustered: HashSet<&str> = story_rows
        .iter()
        .zip(cluster_ids.iter())
        .filter(|(_, cid)| cid.is_some())
        .map(|(story, _)| story.story_hash.as_str())
        .collect();

    let title_tuples: Vec<(String, i32, String)> = story_rows
        .iter()
        .map(|s| (s.story_hash.clone(), s.story_feed_id, s.story_title.clone()))
        .collect();
    let title_duplicates = find_duplicate_stories(&title_tuples);

    let candidates: Vec<Candidate> = story_rows
        .iter()
        .map(|story| {
            let excerpt = story.excerpt(EXCERPT_CHARS);
            Candidate {
                story_hash: story.story_hash.clone(),
                feed_id: story.story_feed_id,
                date_ts: story.story_date.and_utc().timestamp(),
                is_read: read_state
                    .get(story.story_hash.as_str())
                    .copied()
                    .unwrap_or(false),
                word_count: story.word_count(),
                classifier_matches: get_classifier_matches(story, &user_classifiers, &feed_titles),
                custom_section: match_custom_section(
                    options.custom_prompts,
                    &story.story_title,
                    &excerpt,
                    |slot| {
                        options
                            .enabled_sections
                            .get(&format!("custom_{slot}"))
                            .copied()
                            .unwrap_or(false)
                    },
                ),
                in_cluster: clustered.contains(story.story_hash.as_str())
                    || title_duplicates.contains(&story.story_hash),
                feed_trending: feed_trending
                    .get(&story.story_hash)
                    .copied()
                    .unwrap_or(0.0),
                global_trending: global_trending
                    .get(&story.story_hash)
                    .copied()
                    .unwrap_or(0.0),
                feed_recently_read: recently_read_feeds.contains(&story.story_feed_id),
            }
        })
        .collect();

    let candidates = apply_read_filter(candidates, options.read_filter);
    Ok(rank_candidates(candidates, options.max_stories))
}

async fn trending_scores(
    redis: &mut redis::aio::ConnectionManager,
    key: &str,
    hashes: &[String],
) -> Result<HashMap<String, f64>, eyre::Error> {
    let scores: Vec<Option<f64>> = redis::cmd("ZMSCORE")
        .arg(key)
        .arg(hashes)
        .query_async(redis)
        .await?;
    Ok(hashes
        .iter()
        .zip(scores)
        .filter_map(|(hash, score)| score.map(|s| (hash.clone(), s)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(hash: &str, feed_id: i32, word_count: usize) -> Candidate {
        Candidate {
            story_hash: hash.to_string(),
            feed_id,
            date_ts: 1000,
            is_read: false,
            word_count,
            classifier_matches: vec![],
            custom_section: None,
            in_cluster: false,
            feed_trending: 0.0,
            global_trending: 0.0,
            feed_recently_read: false,
        }
    }

    #[test]
    fn long_read_category_uses_median_and_floor() {
        // A lone 900-word story is its own median and qualifies
        let c = candidate("1:a", 1, 900);
        assert_eq!(categorize(&c, 900), "long_read");
        // 150 words is below the absolute floor regardless of median
        let c = candidate("1:b", 1, 150);
        assert_eq!(categorize(&c, 150), "trending_global");
    }

    #[test]
    fn category_ladder_first_match_wins() {
        let mut c = candidate("1:a", 1, 900);
        c.classifier_matches = vec!["feed:Test".to_string()];
        c.in_cluster = true;
        assert_eq!(categorize(&c, 0), "classifier_match");

        let mut c = candidate("1:b", 1, 900);
        c.custom_section = Some(2);
        c.in_cluster = true;
        assert_eq!(categorize(&c, 0), "custom_2");

        let mut c = candidate("1:c", 1, 100);
        c.in_cluster = true;
        assert_eq!(categorize(&c, 0), "duplicates");

        let mut c = candidate("1:d", 1, 100);
        c.feed_recently_read = true;
        assert_eq!(categorize(&c, 0), "follow_up");

        let mut c = candidate("1:e", 1, 100);
        c.feed_trending = 25.0;
        assert_eq!(categorize(&c, 0), "trending_unread");
    }

    #[test]
    fn unread_candidates_score_higher() {
        let unread = candidate("1:a", 1, 100);
        let mut read = candidate("1:b", 1, 100);
        read.is_read = true;
        assert!(score(&unread) > score(&read));
    }

    #[test]
    fn ranked_output_is_sorted_by_score() {
        let mut strong = candidate("1:a", 1, 100);
        strong.classifier_matches = vec!["feed:X".to_string()];
        let weak = candidate("2:b", 2, 100);

        let result = rank_candidates(vec![weak, strong], 10);
        let scores: Vec<f64> = result.iter().map(|s| s.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(scores, sorted);
        assert_eq!(result[0].story_hash, "1:a");
    }

    #[test]
    fn ties_break_to_newer_stories() {
        let mut older = candidate("1:a", 1, 100);
        older.date_ts = 500;
        let mut newer = candidate("2:b", 2, 100);
        newer.date_ts = 900;

        let result = rank_candidates(vec![older, newer], 10);
        assert_eq!(result[0].story_hash, "2:b");
    }

    #[test]
    fn max_stories_truncates() {
        let candidates: Vec<Candidate> = (0..6)
            .map(|i| candidate(&format!("{}:h{i}", i + 1), i + 1, 100))
            .collect();
        assert_eq!(rank_candidates(candidates, 2).len(), 2);
    }

    #[test]
    fn per_feed_cap_is_three() {
        let mut candidates: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("1:h{i}"), 1, 100))
            .collect();
        candidates.push(candidate("2:other", 2, 100));

        let result = rank_candidates(candidates, 10);
        let feed1 = result
            .iter()
            .filter(|s| s.story_hash.starts_with("1:"))
            .count();
        assert_eq!(feed1, MAX_PER_FEED);
        assert_eq!(result.len(), MAX_PER_FEED + 1);
    }

    #[test]
    fn read_filter_drops_read_when_enough_unread() {
        let mut candidates: Vec<Candidate> = (0..3)
            .map(|i| candidate(&format!("1:u{i}"), 1, 100))
            .collect();
        let mut read = candidate("1:r", 1, 100);
        read.is_read = true;
        candidates.push(read);

        let filtered = apply_read_filter(candidates, ReadFilter::Unread);
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|c| !c.is_read));
    }

    #[test]
    fn read_filter_falls_back_below_threshold() {
        // Two unread is one short of the floor, so read stories stay
        let mut candidates: Vec<Candidate> = (0..2)
            .map(|i| candidate(&format!("1:u{i}"), 1, 100))
            .collect();
        let mut read = candidate("1:r", 1, 100);
        read.is_read = true;
        candidates.push(read);

        let filtered = apply_read_filter(candidates, ReadFilter::Unread);
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().any(|c| c.is_read));
    }

    #[test]
    fn read_filter_all_keeps_everything() {
        let mut read = candidate("1:r", 1, 100);
        read.is_read = true;
        let candidates = vec![
            candidate("1:u0", 1, 100),
            candidate("1:u1", 1, 100),
            candidate("1:u2", 1, 100),
            read,
        ];
        assert_eq!(apply_read_filter(candidates, ReadFilter::All).len(), 4);
    }

    fn story(hash: &str, feed_id: i32, title: &str, author: &str, tags: &[&str]) -> Story {
        Story {
            story_hash: hash.to_string(),
            story_feed_id: feed_id,
            story_title: title.to_string(),
            story_author: Some(author.to_string()),
            story_date: chrono::NaiveDateTime::default(),
            story_content: None,
            story_tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn classifier(kind: &str, feed_id: Option<i32>, value: &str, score: i32) -> Classifier {
        Classifier {
            id: 0,
            user_id: 1,
            kind: kind.to_string(),
            feed_id,
            value: value.to_string(),
            score,
        }
    }

    #[test]
    fn classifier_matches_feed_and_author() {
        let s = story("1:a", 1, "Breaking News About Tech", "Alice", &[]);
        let feed_titles = HashMap::from([(1, "Test Feed 1".to_string())]);
        let classifiers = vec![
            classifier(KIND_FEED, Some(1), "", 1),
            classifier(KIND_AUTHOR, Some(1), "Alice", 1),
        ];
        let matches = get_classifier_matches(&s, &classifiers, &feed_titles);
        assert!(matches.contains(&"feed:Test Feed 1".to_string()));
        assert!(matches.contains(&"author:Alice".to_string()));
    }

    #[test]
    fn negative_classifiers_never_match() {
        let s = story("1:a", 1, "Breaking News", "Alice", &["rust"]);
        let feed_titles = HashMap::new();
        let classifiers = vec![
            classifier(KIND_FEED, Some(1), "", -1),
            classifier(KIND_TAG, Some(1), "rust", 0),
        ];
        assert!(get_classifier_matches(&s, &classifiers, &feed_titles).is_empty());
    }

    #[test]
    fn classifier_matches_tag_and_title() {
        let s = story("1:a", 1, "Rust 2.0 Released", "Bob", &["programming"]);
        let feed_titles = HashMap::new();
        let classifiers = vec![
            classifier(KIND_TAG, Some(1), "Programming", 1),
            classifier(KIND_TITLE, Some(1), "rust", 1),
        ];
        let matches = get_classifier_matches(&s, &classifiers, &feed_titles);
        assert!(matches.contains(&"tag:Programming".to_string()));
        assert!(matches.contains(&"title:rust".to_string()));
    }

    #[test]
    fn duplicates_require_two_feeds() {
        let cross_feed = vec![
            ("1:a".to_string(), 1, "Breaking News About Tech".to_string()),
            ("2:b".to_string(), 2, "Breaking News About Tech".to_string()),
        ];
        let dupes = find_duplicate_stories(&cross_feed);
        assert!(dupes.contains("1:a"));
        assert!(dupes.contains("2:b"));

        let same_feed = vec![
            ("1:a".to_string(), 1, "Breaking News About Tech".to_string()),
            ("1:b".to_string(), 1, "Breaking News About Tech".to_string()),
        ];
        assert!(find_duplicate_stories(&same_feed).is_empty());
    }

    #[test]
    fn short_titles_never_count_as_duplicates() {
        let candidates = vec![
            ("1:a".to_string(), 1, "Hi".to_string()),
            ("2:b".to_string(), 2, "Hi".to_string()),
        ];
        assert!(find_duplicate_stories(&candidates).is_empty());
    }

    #[test]
    fn custom_sections_match_keywords_when_enabled() {
        let prompts = vec!["rust, cargo".to_string(), "space".to_string()];
        let all_on = |_: usize| true;
        assert_eq!(
            match_custom_section(&prompts, "Cargo tricks", "", all_on),
            Some(1)
        );
        assert_eq!(
            match_custom_section(&prompts, "SpaceX launch", "", all_on),
            Some(2)
        );
        assert_eq!(
            match_custom_section(&prompts, "Gardening tips", "", all_on),
            None
        );
        // Disabled slots are skipped even on a match
        assert_eq!(
            match_custom_section(&prompts, "Cargo tricks", "", |slot| slot != 1),
            None
        );
    }
}
