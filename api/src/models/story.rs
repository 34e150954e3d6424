use std::sync::LazyLock;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use regex::Regex;
use serde::Serialize;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Queryable, Selectable, Debug, Serialize, Clone)]
#[diesel(table_name = crate::schema::stories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Story {
    pub story_hash: String,
    pub story_feed_id: i32,
    pub story_title: String,
    pub story_author: Option<String>,
    pub story_date: NaiveDateTime,
    pub story_content: Option<String>,
    pub story_tags: Vec<String>,
}

impl Story {
    pub fn guid_hash(&self) -> &str {
        guid_hash_of(&self.story_hash)
    }

    /// Word count of the plain-text content.
    pub fn word_count(&self) -> usize {
        match &self.story_content {
            Some(content) => strip_html(content).split_whitespace().count(),
            None => 0,
        }
    }

    /// Plain-text excerpt of the content, truncated to `max_chars`.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let Some(content) = &self.story_content else {
            return String::new();
        };
        let text = strip_html(content);
        if text.chars().count() > max_chars {
            let truncated: String = text.chars().take(max_chars).collect();
            format!("{truncated}...")
        } else {
            text
        }
    }
}

/// The guid half of a `<feed_id>:<guid_hash>` story hash. Stories sharing a
/// guid across branched feed copies are the same underlying article.
pub fn guid_hash_of(story_hash: &str) -> &str {
    story_hash
        .split_once(':')
        .map(|(_, guid)| guid)
        .unwrap_or(story_hash)
}

fn strip_html(content: &str) -> String {
    let text = TAG_RE.replace_all(content, " ");
    WS_RE.replace_all(&text, " ").trim().to_string()
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::stories)]
pub struct NewStory {
    pub story_hash: String,
    pub story_feed_id: i32,
    pub story_title: String,
    pub story_author: Option<String>,
    pub story_date: NaiveDateTime,
    pub story_content: Option<String>,
    pub story_tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(content: Option<&str>) -> Story {
        Story {
            story_hash: "7:abcd1234".to_string(),
            story_feed_id: 7,
            story_title: "A Story".to_string(),
            story_author: None,
            story_date: chrono::NaiveDateTime::default(),
            story_content: content.map(|c| c.to_string()),
            story_tags: vec![],
        }
    }

    #[test]
    fn guid_hash_is_suffix() {
        assert_eq!(story(None).guid_hash(), "abcd1234");
        assert_eq!(guid_hash_of("no-colon-hash"), "no-colon-hash");
    }

    #[test]
    fn word_count_strips_markup() {
        let s = story(Some("<p>one two</p> <b>three</b>"));
        assert_eq!(s.word_count(), 3);
        assert_eq!(story(None).word_count(), 0);
        assert_eq!(story(Some("")).word_count(), 0);
    }

    #[test]
    fn excerpt_truncates() {
        let long = "word ".repeat(100);
        let s = story(Some(&long));
        let excerpt = s.excerpt(300);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.chars().count(), 303);
    }

    #[test]
    fn excerpt_short_content_untouched() {
        let s = story(Some("<p>short and sweet</p>"));
        assert_eq!(s.excerpt(300), "short and sweet");
    }
}
