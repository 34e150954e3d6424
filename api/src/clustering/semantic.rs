//! Optional semantic similarity tier backed by an external vector-search
//! service speaking the Elasticsearch `more_like_this` dialect.

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::json;

use crate::config::SemanticSearch;

/// Title text sent as the query is capped to keep request sizes sane.
const QUERY_TEXT_CAP: usize = 2000;
const MAX_FILTER_FEEDS: usize = 2000;
pub const MIN_RELEVANCE_SCORE: u32 = 30;
pub const RESULT_SIZE: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    /// The service is unreachable; the whole semantic tier short-circuits.
    #[error("search service unreachable: {0}")]
    Connection(#[from] reqwest::Error),
    /// Index or story missing; skip this story and continue.
    #[error("not found")]
    NotFound,
    #[error("search failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub story_hash: String,
    pub feed_id: Option<i32>,
}

pub struct SemanticSearchClient {
    http: reqwest::Client,
    url: String,
    index: String,
}

impl SemanticSearchClient {
    pub fn new(http: reqwest::Client, config: &SemanticSearch) -> Self {
        Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        }
    }

    /// Find stories similar to `title` across `feed_ids`, newer than
    /// `lookback`. Only hits scoring at least `MIN_RELEVANCE_SCORE` come back.
    pub async fn similar_stories(
        &self,
        title: &str,
        feed_ids: &[i32],
        lookback: NaiveDateTime,
    ) -> Result<Vec<SemanticHit>, SemanticSearchError> {
        let query_text: String = title.chars().take(QUERY_TEXT_CAP).collect();
        let feed_filter: Vec<i32> = feed_ids.iter().copied().take(MAX_FILTER_FEEDS).collect();

        let body = json!({
            "query": {
                "bool": {
                    "must": [{
                        "more_like_this": {
                            "fields": ["title", "content"],
                            "like": query_text,
                            "min_term_freq": 1,
                            "min_doc_freq": 2,
                            "min_word_length": 3,
                            "max_query_terms": 25,
                        }
                    }],
                    "filter": [
                        {"terms": {"feed_id": feed_filter}},
                        {"range": {"date": {"gte": lookback.format("%Y-%m-%d").to_string()}}},
                    ],
                }
            },
            "min_score": MIN_RELEVANCE_SCORE,
            "size": RESULT_SIZE,
            "_source": false,
            "docvalue_fields": ["feed_id"],
        });

        let response = self
            .http
            .post(format!("{}/{}/_search", self.url, self.index))
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SemanticSearchError::NotFound);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SemanticSearchError::Other(format!("{status}: {text}")));
        }

        let results: SearchResponse = response
            .json()
            .await
            .map_err(|err| SemanticSearchError::Other(err.to_string()))?;

        Ok(results
            .hits
            .hits
            .into_iter()
            .map(|hit| SemanticHit {
                story_hash: hit.id,
                feed_id: hit
                    .fields
                    .and_then(|f| f.feed_id.into_iter().next()),
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    fields: Option<HitFields>,
}

#[derive(Deserialize)]
struct HitFields {
    #[serde(default)]
    feed_id: Vec<i32>,
}
