//! Title-based story similarity: exact normalized-title matching plus fuzzy
//! significant-word overlap, merged through a single disjoint-set.
//!
//! Everything here is pure; Redis and database access live in the parent
//! module so these paths can be exercised without infrastructure.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::story::guid_hash_of;

pub const CLUSTER_TTL_SECONDS: u64 = 14 * 24 * 60 * 60;
pub const CLUSTER_LOOKBACK_HOURS: i64 = 120;
pub const CLUSTER_MAX_SIZE: usize = 10;
pub const TITLE_MIN_LENGTH: usize = 10;
pub const FUZZY_MIN_WORDS: usize = 5;
pub const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.6;
/// Words appearing in more postings than this are too common to pair on.
const MAX_WORD_POSTINGS: usize = 50;

static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Common English stopwords excluded from fuzzy title matching.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    "a an the and or but in on at to for of is it by with from as be was were are this that \
     have has had do does did will would could should may might can shall not no its his her \
     their our your my been being"
        .split_whitespace()
        .collect()
});

/// Story metadata needed for clustering decisions.
#[derive(Debug, Clone)]
pub struct StoryMeta {
    pub story_hash: String,
    pub feed_id: i32,
    /// The feed's `branch_from_feed` target if present, else the feed itself.
    pub resolved_feed_id: i32,
    pub story_title: String,
    /// Unix timestamp of publication; 0 when unknown.
    pub story_date: i64,
}

impl StoryMeta {
    pub fn guid_hash(&self) -> &str {
        guid_hash_of(&self.story_hash)
    }
}

pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = NON_WORD_RE.replace_all(&lowered, "");
    WS_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Significant (non-stopword, length > 2) words of a normalized title.
pub fn title_significant_words(title: &str) -> HashSet<String> {
    normalize_title(title)
        .split_whitespace()
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Disjoint-set over a contiguous arena, path-halving with union by rank.
pub struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
            rank: vec![0; len],
        }
    }

    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    pub fn union(&mut self, a: u32, b: u32) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            std::cmp::Ordering::Less => self.parent[ra as usize] = rb,
            std::cmp::Ordering::Greater => self.parent[rb as usize] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] += 1;
            }
        }
        true
    }
}

/// Group stories by title similarity across different resolved feeds.
///
/// Tier A: exact normalized-title match. Tier B: significant-word Jaccard
/// similarity for stories tier A left alone. Returns
/// `cluster_id -> ordered members` where the cluster id is the hash of the
/// earliest member. Only groups spanning 2+ guids on 2+ resolved feeds
/// survive.
pub fn find_title_clusters(stories: &[StoryMeta]) -> HashMap<String, Vec<String>> {
    let mut ds = DisjointSet::new(stories.len());
    let mut joined = vec![false; stories.len()];

    // Tier A: exact normalized title
    let mut title_groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, story) in stories.iter().enumerate() {
        let norm = normalize_title(&story.story_title);
        if norm.chars().count() < TITLE_MIN_LENGTH {
            continue;
        }
        title_groups.entry(norm).or_default().push(idx);
    }

    for group in title_groups.values() {
        // One representative per guid; branched copies of the same article
        // must not manufacture a cluster on their own.
        let mut by_guid: HashMap<&str, usize> = HashMap::new();
        for &idx in group {
            by_guid.entry(stories[idx].guid_hash()).or_insert(idx);
        }
        let representatives: Vec<usize> = by_guid.into_values().collect();
        let feeds: HashSet<i32> = representatives
            .iter()
            .map(|&idx| stories[idx].resolved_feed_id)
            .collect();
        if feeds.len() < 2 {
            continue;
        }
        for &idx in &representatives[1..] {
            ds.union(representatives[0] as u32, idx as u32);
            joined[idx] = true;
        }
        joined[representatives[0]] = true;
    }

    // Tier B: fuzzy word-overlap for stories tier A didn't place
    let word_index: Vec<(usize, HashSet<String>)> = stories
        .iter()
        .enumerate()
        .filter(|(idx, _)| !joined[*idx])
        .filter_map(|(idx, story)| {
            let words = title_significant_words(&story.story_title);
            (words.len() >= FUZZY_MIN_WORDS).then_some((idx, words))
        })
        .collect();

    let mut inverted: HashMap<&str, Vec<usize>> = HashMap::new();
    for (pos, (_, words)) in word_index.iter().enumerate() {
        for word in words {
            inverted.entry(word).or_default().push(pos);
        }
    }

    let mut seen_pairs: HashSet<(usize, usize)> = HashSet::new();
    for positions in inverted.values() {
        if positions.len() > MAX_WORD_POSTINGS {
            continue;
        }
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                let (mut a, mut b) = (positions[i], positions[j]);
                if a > b {
                    std::mem::swap(&mut a, &mut b);
                }
                if !seen_pairs.insert((a, b)) {
                    continue;
                }

                let (idx_a, words_a) = &word_index[a];
                let (idx_b, words_b) = &word_index[b];
                let (story_a, story_b) = (&stories[*idx_a], &stories[*idx_b]);
                if story_a.resolved_feed_id == story_b.resolved_feed_id
                    || story_a.guid_hash() == story_b.guid_hash()
                {
                    continue;
                }

                if jaccard(words_a, words_b) >= FUZZY_SIMILARITY_THRESHOLD {
                    ds.union(*idx_a as u32, *idx_b as u32);
                }
            }
        }
    }

    // Collect components and apply the emission rules
    let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
    for (idx, story) in stories.iter().enumerate() {
        if normalize_title(&story.story_title).chars().count() < TITLE_MIN_LENGTH {
            continue;
        }
        groups.entry(ds.find(idx as u32)).or_default().push(idx);
    }

    let mut clusters = HashMap::new();
    for members in groups.into_values() {
        if let Some((cluster_id, member_hashes)) = emit_cluster(stories, &members) {
            clusters.insert(cluster_id, member_hashes);
        }
    }
    clusters
}

/// Apply the cluster emission rules to one connected component: 2+ distinct
/// guids across 2+ resolved feeds, sorted by date, deduplicated by guid,
/// truncated, identified by the earliest member.
fn emit_cluster(stories: &[StoryMeta], members: &[usize]) -> Option<(String, Vec<String>)> {
    if members.len() < 2 {
        return None;
    }

    let mut sorted: Vec<usize> = members.to_vec();
    sorted.sort_by_key(|&idx| (stories[idx].story_date, stories[idx].story_hash.clone()));

    let mut seen_guids: HashSet<&str> = HashSet::new();
    let mut deduped: Vec<usize> = Vec::new();
    for &idx in &sorted {
        if seen_guids.insert(stories[idx].guid_hash()) {
            deduped.push(idx);
        }
    }
    if deduped.len() < 2 {
        return None;
    }

    let feeds: HashSet<i32> = deduped
        .iter()
        .map(|&idx| stories[idx].resolved_feed_id)
        .collect();
    if feeds.len() < 2 {
        return None;
    }

    deduped.truncate(CLUSTER_MAX_SIZE);
    let hashes: Vec<String> = deduped
        .iter()
        .map(|&idx| stories[idx].story_hash.clone())
        .collect();
    Some((hashes[0].clone(), hashes))
}

/// Merge independently computed cluster sets (title tiers, semantic tier)
/// through one disjoint-set. Any story appearing in two clusters fuses them.
/// The emission rules are re-applied to the merged components.
pub fn merge_clusters(
    cluster_sets: &[&HashMap<String, Vec<String>>],
    resolved_feeds: &HashMap<String, i32>,
    story_dates: &HashMap<String, i64>,
) -> HashMap<String, Vec<String>> {
    let mut all_hashes: Vec<&String> = Vec::new();
    let mut index: HashMap<&str, u32> = HashMap::new();
    for set in cluster_sets {
        for members in set.values() {
            for hash in members {
                if !index.contains_key(hash.as_str()) {
                    index.insert(hash.as_str(), all_hashes.len() as u32);
                    all_hashes.push(hash);
                }
            }
        }
    }
    if all_hashes.is_empty() {
        return HashMap::new();
    }

    let mut ds = DisjointSet::new(all_hashes.len());
    for set in cluster_sets {
        for members in set.values() {
            for pair in members.windows(2) {
                ds.union(index[pair[0].as_str()], index[pair[1].as_str()]);
            }
        }
    }

    let mut groups: HashMap<u32, Vec<&String>> = HashMap::new();
    for (pos, hash) in all_hashes.iter().enumerate() {
        groups.entry(ds.find(pos as u32)).or_default().push(hash);
    }

    let mut clusters = HashMap::new();
    for members in groups.into_values() {
        if members.len() < 2 {
            continue;
        }

        let mut sorted: Vec<&String> = members;
        sorted.sort_by_key(|hash| (story_dates.get(*hash).copied().unwrap_or(0), (*hash).clone()));

        let mut seen_guids: HashSet<&str> = HashSet::new();
        let mut deduped: Vec<&String> = Vec::new();
        for hash in sorted {
            if seen_guids.insert(guid_hash_of(hash)) {
                deduped.push(hash);
            }
        }
        if deduped.len() < 2 {
            continue;
        }

        // Feed diversity is checked over members with known feeds only
        let feeds: HashSet<i32> = deduped
            .iter()
            .filter_map(|hash| resolved_feeds.get(*hash).copied())
            .collect();
        if feeds.len() < 2 {
            continue;
        }

        deduped.truncate(CLUSTER_MAX_SIZE);
        let hashes: Vec<String> = deduped.into_iter().cloned().collect();
        clusters.insert(hashes[0].clone(), hashes);
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(hash: &str, feed_id: i32, title: &str, date: i64) -> StoryMeta {
        StoryMeta {
            story_hash: hash.to_string(),
            feed_id,
            resolved_feed_id: feed_id,
            story_title: title.to_string(),
            story_date: date,
        }
    }

    #[test]
    fn normalize_title_strips_punctuation_and_case() {
        assert_eq!(normalize_title("  Breaking News!  "), "breaking news");
        assert_eq!(normalize_title(""), "");
        assert_eq!(normalize_title("A   lot\tof   space"), "a lot of space");
    }

    #[test]
    fn significant_words_drop_stopwords_and_short_words() {
        let words = title_significant_words("The cat is on a launchpad at dawn");
        assert!(words.contains("cat"));
        assert!(words.contains("launchpad"));
        assert!(words.contains("dawn"));
        assert!(!words.contains("the"));
        assert!(!words.contains("on"));
    }

    #[test]
    fn exact_title_cross_feed_clusters() {
        let stories = vec![
            story("1:aaa", 1, "Breaking News About Tech", 100),
            story("2:bbb", 2, "Breaking News About Tech", 200),
        ];
        let clusters = find_title_clusters(&stories);
        assert_eq!(clusters.len(), 1);
        let (id, members) = clusters.iter().next().unwrap();
        assert_eq!(id, "1:aaa", "cluster id is the earliest story");
        assert_eq!(members, &vec!["1:aaa".to_string(), "2:bbb".to_string()]);
    }

    #[test]
    fn same_feed_duplicates_do_not_cluster() {
        let stories = vec![
            story("1:aaa", 1, "Breaking News About Tech", 100),
            story("1:bbb", 1, "Breaking News About Tech", 200),
        ];
        assert!(find_title_clusters(&stories).is_empty());
    }

    #[test]
    fn branched_feeds_resolve_to_one_source() {
        let mut a = story("1:aaa", 1, "Breaking News About Tech", 100);
        let mut b = story("2:bbb", 2, "Breaking News About Tech", 200);
        a.resolved_feed_id = 9;
        b.resolved_feed_id = 9;
        assert!(find_title_clusters(&[a, b]).is_empty());
    }

    #[test]
    fn shared_guid_across_feeds_is_one_article() {
        // Same guid on two feeds is a branched copy, not a duplicate pair
        let stories = vec![
            story("1:aaa", 1, "Breaking News About Tech", 100),
            story("2:aaa", 2, "Breaking News About Tech", 200),
        ];
        assert!(find_title_clusters(&stories).is_empty());
    }

    #[test]
    fn title_length_boundary() {
        // "hellothere" normalizes to exactly 10 chars and participates
        let ten = vec![
            story("1:aaa", 1, "HelloThere", 100),
            story("2:bbb", 2, "HelloThere", 200),
        ];
        assert_eq!(find_title_clusters(&ten).len(), 1);

        let nine = vec![
            story("1:aaa", 1, "HelloTher", 100),
            story("2:bbb", 2, "HelloTher", 200),
        ];
        assert!(find_title_clusters(&nine).is_empty());
    }

    #[test]
    fn fuzzy_overlap_joins_rephrased_headlines() {
        // 6 shared words of 7 each: jaccard = 6/8 = 0.75
        let stories = vec![
            story(
                "1:aaa",
                1,
                "Quantum rocket engine fusion breakthrough stuns physicists",
                100,
            ),
            story(
                "2:bbb",
                2,
                "Quantum rocket engine fusion breakthrough stuns investors",
                200,
            ),
        ];
        let clusters = find_title_clusters(&stories);
        assert_eq!(clusters.len(), 1);
    }

    #[test]
    fn fuzzy_below_threshold_stays_apart() {
        // 3 shared words of 6 each: jaccard = 3/9 = 0.33
        let stories = vec![
            story(
                "1:aaa",
                1,
                "Quantum rocket engine wins national science award",
                100,
            ),
            story(
                "2:bbb",
                2,
                "Quantum rocket engine recalled after safety review panel",
                200,
            ),
        ];
        assert!(find_title_clusters(&stories).is_empty());
    }

    #[test]
    fn jaccard_exact_threshold() {
        let set = |words: &[&str]| -> HashSet<String> {
            words.iter().map(|w| w.to_string()).collect()
        };
        // 6 shared, 10 in the union: exactly 0.60
        let a = set(&[
            "quantum", "neural", "rocket", "fusion", "orbital", "plasma", "stellar", "module",
        ]);
        let b = set(&[
            "quantum", "neural", "rocket", "fusion", "orbital", "plasma", "comet", "engine",
        ]);
        assert!(jaccard(&a, &b) >= FUZZY_SIMILARITY_THRESHOLD);

        // 6 shared, 11 in the union: ~0.545
        let c = set(&[
            "quantum", "neural", "rocket", "fusion", "orbital", "plasma", "comet", "engine",
            "booster",
        ]);
        assert!(jaccard(&a, &c) < FUZZY_SIMILARITY_THRESHOLD);
    }

    #[test]
    fn fuzzy_requires_five_significant_words() {
        // 4 significant words each, identical: would be jaccard 1.0 but the
        // word floor keeps them out of tier B (and tier A is off: titles differ)
        let stories = vec![
            story("1:aaa", 1, "Quantum rocket fusion breakthrough", 100),
            story("2:bbb", 2, "Quantum rocket fusion breakthrough now", 200),
        ];
        assert!(find_title_clusters(&stories).is_empty());

        // 5 significant words: participates
        let stories = vec![
            story("1:aaa", 1, "Quantum rocket fusion breakthrough landing", 100),
            story(
                "2:bbb",
                2,
                "Quantum rocket fusion breakthrough landing now",
                200,
            ),
        ];
        assert_eq!(find_title_clusters(&stories).len(), 1);
    }

    #[test]
    fn cluster_truncated_to_max_size() {
        let stories: Vec<StoryMeta> = (0..15)
            .map(|i| {
                story(
                    &format!("{}:guid{}", i + 1, i),
                    i + 1,
                    "Breaking News About Tech",
                    100 + i as i64,
                )
            })
            .collect();
        let clusters = find_title_clusters(&stories);
        assert_eq!(clusters.len(), 1);
        let members = clusters.values().next().unwrap();
        assert_eq!(members.len(), CLUSTER_MAX_SIZE);
        assert_eq!(members[0], "1:guid0");
    }

    #[test]
    fn merge_fuses_overlapping_clusters() {
        let title: HashMap<String, Vec<String>> = HashMap::from([(
            "1:aaa".to_string(),
            vec!["1:aaa".to_string(), "2:bbb".to_string()],
        )]);
        let semantic: HashMap<String, Vec<String>> = HashMap::from([(
            "2:bbb".to_string(),
            vec!["2:bbb".to_string(), "3:ccc".to_string()],
        )]);
        let feeds = HashMap::from([
            ("1:aaa".to_string(), 1),
            ("2:bbb".to_string(), 2),
            ("3:ccc".to_string(), 3),
        ]);
        let dates = HashMap::from([
            ("1:aaa".to_string(), 100),
            ("2:bbb".to_string(), 200),
            ("3:ccc".to_string(), 300),
        ]);

        let merged = merge_clusters(&[&title, &semantic], &feeds, &dates);
        assert_eq!(merged.len(), 1);
        let members = merged.get("1:aaa").expect("earliest member is the id");
        assert_eq!(members.len(), 3);
    }

    #[test]
    fn merge_enforces_feed_diversity() {
        let title: HashMap<String, Vec<String>> = HashMap::from([(
            "1:aaa".to_string(),
            vec!["1:aaa".to_string(), "2:bbb".to_string()],
        )]);
        // Both members resolve to the same original feed
        let feeds = HashMap::from([("1:aaa".to_string(), 1), ("2:bbb".to_string(), 1)]);
        let dates = HashMap::new();
        assert!(merge_clusters(&[&title], &feeds, &dates).is_empty());
    }

    #[test]
    fn cluster_id_is_a_member() {
        let stories = vec![
            story("3:ccc", 3, "Breaking News About Tech", 300),
            story("1:aaa", 1, "Breaking News About Tech", 100),
            story("2:bbb", 2, "Breaking News About Tech", 200),
        ];
        let clusters = find_title_clusters(&stories);
        for (id, members) in &clusters {
            assert!(members.contains(id));
            assert_eq!(&members[0], id);
        }
    }
}
