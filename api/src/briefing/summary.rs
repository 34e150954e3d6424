//! Briefing summary generation: prompt construction, model selection with
//! provider fallback, and per-call cost recording.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use regex::Regex;

use crate::App;
use crate::briefing::models::{BriefingPrefs, DEFAULT_SECTION, default_sections};
use crate::briefing::scoring::ScoredStory;
use crate::llm::provider::{ChatMessage, LlmProvider};
use crate::llm::{BriefingModel, DEFAULT_BRIEFING_MODEL, LlmRegistry, cost_usd, resolve_briefing_model};
use crate::models::story::Story;

const EXCERPT_CHARS: usize = 300;
const MAX_TOKENS_CEILING: u32 = 4096;

static LENGTH_INSTRUCTIONS: &[(&str, &str)] = &[
    (
        "short",
        "Include ALL sections listed above that have relevant stories, but keep each story to a \
         single sentence or headline. Under 300 words total.",
    ),
    (
        "medium",
        "Include ALL sections listed above that have relevant stories. Keep each story to 1-2 \
         sentences. Under 600 words total.",
    ),
    (
        "detailed",
        "Include ALL sections listed above that have relevant stories. Write 2-3 sentences of \
         analysis per story. Explain connections between stories where relevant. Up to 1000 words.",
    ),
];

static STYLE_INSTRUCTIONS: &[(&str, &str)] = &[
    (
        "editorial",
        "Write in a narrative editorial style with flowing prose that connects stories \
         thematically. Wrap each story paragraph in a <p> tag. Do NOT use <ul> or <li> tags.",
    ),
    (
        "bullets",
        "Write each story as a concise one-sentence summary. Group by the section headers below. \
         Wrap each story in its own <p> tag. Do NOT use <ul> or <li> tags.",
    ),
    (
        "headlines",
        "List each story as a headline with a single explanatory sentence beneath it. Group by \
         the section headers below. Wrap each story in its own <p> tag. Do NOT use <ul> or <li> \
         tags.",
    ),
];

/// Section instructions in display order. Only enabled sections make it into
/// the prompt.
static SECTION_PROMPTS: &[(&str, &str)] = &[
    (
        "trending_unread",
        "\"Stories you missed\" — CATEGORY: trending_unread. Popular stories the reader hasn't \
         read yet.",
    ),
    (
        "long_read",
        "\"Long reads for later\" — CATEGORY: long_read. Longer articles worth setting time \
         aside for. Use the WORD_COUNT field to judge which stories qualify as long reads \
         relative to other stories.",
    ),
    (
        "classifier_match",
        "\"Based on your interests\" — CATEGORY: classifier_match. Stories matching topics, \
         authors, or feeds the reader has trained as interesting. After each story link, include \
         ALL matching classifiers from the MATCHES field as pills. For each match in MATCHES, \
         output this exact HTML: \
         <span class=\"NB-classifier NB-classifier-TYPE NB-classifier-like \
         NB-briefing-classifier\"><div class=\"NB-classifier-icon-like\"></div>\
         <label><b>TYPE_TITLE: </b><span>VALUE</span></label></span> \
         where TYPE is the prefix before the colon (feed, author, tag, or title), TYPE_TITLE is \
         the ALL CAPS version (SITE for feed, AUTHOR, TAG, or TITLE), and VALUE is the text \
         after the colon. Include all matches, not just the first one.",
    ),
    (
        "follow_up",
        "\"Follow-ups\" — CATEGORY: follow_up. New posts from feeds where the reader recently \
         read other stories.",
    ),
    (
        "trending_global",
        "\"Trending across your network\" — CATEGORY: trending_global. Widely-read stories from \
         across the platform.",
    ),
    (
        "duplicates",
        "\"Common stories\" — CATEGORY: duplicates. Stories covered by multiple feeds. For each \
         story, show the shared headline then list each source's unique angle or perspective as \
         sub-items.",
    ),
    (
        "quick_catchup",
        "\"Quick catch-up\" — KEY: quick_catchup. This is a special section. Select the 3-5 most \
         important stories from the entire briefing and write a 1-2 sentence TL;DR for each. \
         Link to each story using the anchor tag format specified below. This section should \
         appear first.",
    ),
    (
        "emerging_topics",
        "\"Emerging topics\" — CATEGORY: emerging_topics. Look across all the stories for topics \
         that appear multiple times or are getting increasing coverage. Group these stories \
         under the topic and explain why it's trending.",
    ),
    (
        "contrarian_views",
        "\"Contrarian views\" — CATEGORY: contrarian_views. Look for stories where different \
         feeds have notably different perspectives on the same topic. Highlight the disagreement \
         and present each side.",
    ),
];

fn lookup<'a>(table: &'a [(&str, &str)], key: &str, fallback: &str) -> &'a str {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .or_else(|| table.iter().find(|(k, _)| *k == fallback))
        .map(|(_, v)| *v)
        .expect("fallback key must exist")
}

/// Build the system prompt enumerating exactly the enabled sections.
pub fn build_system_prompt(
    summary_length: &str,
    summary_style: &str,
    sections: &HashMap<String, bool>,
    custom_section_prompts: &[String],
) -> String {
    let length_instruction = lookup(LENGTH_INSTRUCTIONS, summary_length, "medium");
    let style_instruction = lookup(STYLE_INSTRUCTIONS, summary_style, "bullets");

    let active = if sections.is_empty() {
        default_sections()
    } else {
        sections.clone()
    };

    let mut section_lines = Vec::new();
    let mut num = 1;
    for (key, prompt) in SECTION_PROMPTS {
        if active.get(*key).copied().unwrap_or(false) {
            section_lines.push(format!("{num}. {prompt}"));
            num += 1;
        }
    }
    for (i, prompt) in custom_section_prompts.iter().enumerate() {
        let custom_key = format!("custom_{}", i + 1);
        if active.get(&custom_key).copied().unwrap_or(false) && !prompt.is_empty() {
            section_lines.push(format!(
                "{num}. Keyword section (KEY: {custom_key}) — The reader has a keyword section \
                 that matches stories with these keywords: \"{prompt}\". Generate a section \
                 header based on the keywords. ONLY include stories whose CATEGORY field is set \
                 to {custom_key}."
            ));
            num += 1;
        }
    }

    let sections_text = if section_lines.is_empty() {
        "Include all stories in a single section.".to_string()
    } else {
        section_lines.join("\n")
    };

    format!(
        "You are a personal news editor writing a daily briefing for a reader.\n\
         You are given stories from their RSS feeds, each annotated with a CATEGORY indicating why\n\
         it was selected for them.\n\
         \n\
         Organize the briefing into sections based on these categories. Use ONLY these section headers\n\
         (as <h3 data-section=\"CATEGORY_KEY\"> tags, where CATEGORY_KEY is the category value like\n\
         \"trending_unread\" or \"classifier_match\"). You MUST include every section listed below if there\n\
         are stories that match it. Do not omit sections to save space:\n\
         \n\
         {sections_text}\n\
         \n\
         Within each section, briefly explain WHY these stories matter to the reader — not just what\n\
         they are about. Focus on what makes each story worth reading.\n\
         \n\
         {length_instruction}\n\
         \n\
         {style_instruction}\n\
         \n\
         Reference each story by wrapping its title in an anchor tag like:\n\
         <a class=\"NB-briefing-story-link\" data-story-hash=\"HASH\">Story Title</a>\n\
         \n\
         Output valid HTML. Use <h3 data-section=\"CATEGORY_KEY\"> for section headers.\n\
         Do not use markdown. Do not wrap in code fences. Do not add any preamble.\n\
         Your very first character must be \"<\". Start directly with <div class=\"NB-briefing-summary\">.\n\
         Wrap everything in a <div class=\"NB-briefing-summary\"> tag."
    )
}

/// One candidate, flattened for the user prompt.
pub struct PromptStory {
    pub story_hash: String,
    pub title: String,
    pub feed_title: String,
    pub author: String,
    pub date: Option<NaiveDateTime>,
    pub category: String,
    pub is_read: bool,
    pub word_count: usize,
    pub excerpt: String,
    pub classifier_matches: Vec<String>,
}

/// Categories for disabled sections are remapped to the default section so
/// the model never sees a category it was told not to use. Custom categories
/// are only assigned when their section is enabled, so they pass through.
pub fn category_overrides(
    scored: &[ScoredStory],
    active_sections: &HashMap<String, bool>,
) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    for story in scored {
        if story.category.starts_with("custom_") || story.category == DEFAULT_SECTION {
            continue;
        }
        if !active_sections.get(&story.category).copied().unwrap_or(false) {
            overrides.insert(story.story_hash.clone(), DEFAULT_SECTION.to_string());
        }
    }
    overrides
}

pub fn build_user_prompt(briefing_date: NaiveDateTime, stories: &[PromptStory]) -> String {
    let mut story_lines = Vec::new();
    for story in stories {
        let date = story
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let mut line = format!(
            "- HASH: {}\n  TITLE: {}\n  FEED: {}\n  AUTHOR: {}\n  DATE: {}\n  CATEGORY: {}\n  \
             READ_STATUS: {}\n  WORD_COUNT: {}\n  EXCERPT: {}",
            story.story_hash,
            story.title,
            story.feed_title,
            story.author,
            date,
            story.category,
            if story.is_read { "read" } else { "unread" },
            story.word_count,
            story.excerpt,
        );
        if !story.classifier_matches.is_empty() {
            line.push_str(&format!(
                "\n  MATCHES: {}",
                story.classifier_matches.join(", ")
            ));
        }
        story_lines.push(line);
    }

    format!(
        "Today's date: {}\n\nStories ranked by importance:\n\n{}",
        briefing_date.format("%A, %B %d, %Y"),
        story_lines.join("\n\n")
    )
}

/// Scale the output budget with story and section count, capped.
pub fn token_budget(story_count: usize, enabled_sections: usize) -> u32 {
    let budget = 1024 + (story_count as u32) * 80 + (enabled_sections as u32) * 100;
    budget.min(MAX_TOKENS_CEILING)
}

static FENCE_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```\w*\n?").unwrap());
static FENCE_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n?```\s*$").unwrap());

/// Models occasionally fence their output despite instructions; strip a
/// leading and trailing fence if present.
pub fn strip_code_fences(html: &str) -> String {
    let mut html = html.trim().to_string();
    if html.starts_with("```") {
        html = FENCE_OPEN_RE.replace(&html, "").to_string();
        html = FENCE_CLOSE_RE.replace(&html, "").to_string();
        html = html.trim().to_string();
    }
    html
}

#[derive(Debug, Clone)]
pub struct SummaryMetadata {
    pub model_name: String,
    pub display_name: String,
    pub vendor: &'static str,
    pub model_id: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Pick the provider for the requested model, falling back to the default
/// briefing model when the request is unregistered or unconfigured. Returns
/// `None` when no configured provider remains.
fn select_provider<'a>(
    registry: &'a LlmRegistry,
    requested: Option<&str>,
) -> Option<(&'a dyn LlmProvider, &'static BriefingModel)> {
    let mut model = resolve_briefing_model(requested);
    let mut provider = registry.provider(model.vendor);

    if !provider.is_some_and(|p| p.is_configured()) {
        if model.name != DEFAULT_BRIEFING_MODEL {
            model = resolve_briefing_model(None);
            provider = registry.provider(model.vendor);
        }
        if !provider.is_some_and(|p| p.is_configured()) {
            return None;
        }
    }
    provider.map(|p| (p, model))
}

/// Run one summary generation against the chosen provider. Provider errors
/// are trapped and reported as `None`; the caller decides what failure means.
pub async fn run_generation(
    registry: &LlmRegistry,
    requested_model: Option<&str>,
    system_prompt: String,
    user_prompt: String,
    max_tokens: u32,
) -> Option<(String, SummaryMetadata)> {
    let (provider, model) = select_provider(registry, requested_model)?;

    let messages = [
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_prompt),
    ];

    let html = match provider.generate(&messages, model.model_id, max_tokens).await {
        Ok(html) => html,
        Err(err) => {
            tracing::error!(model = model.name, ?err, "briefing summary generation failed");
            return None;
        }
    };

    let html = strip_code_fences(&html);
    let (input_tokens, output_tokens) = provider.last_usage();

    Some((
        html,
        SummaryMetadata {
            model_name: model.name.to_string(),
            display_name: model.display_name.to_string(),
            vendor: model.vendor.as_str(),
            model_id: model.model_id.to_string(),
            input_tokens,
            output_tokens,
        },
    ))
}

/// Generate the briefing summary HTML for a user's scored candidates.
/// Returns `None` when no provider is configured or the provider call fails;
/// the previous briefing stays visible in that case.
#[tracing::instrument(skip(ctx, scored, prefs))]
pub async fn generate_briefing_summary(
    ctx: &App,
    user_id: i32,
    scored: &[ScoredStory],
    briefing_date: NaiveDateTime,
    prefs: &BriefingPrefs,
) -> Result<Option<(String, SummaryMetadata)>, eyre::Error> {
    use crate::schema::{feeds, stories};

    let mut conn = ctx.diesel.get().await?;

    let hashes: Vec<&String> = scored.iter().map(|s| &s.story_hash).collect();
    let story_rows: Vec<Story> = stories::table
        .filter(stories::story_hash.eq_any(&hashes))
        .select(Story::as_select())
        .load(&mut conn)
        .await?;
    let stories_by_hash: HashMap<&str, &Story> = story_rows
        .iter()
        .map(|s| (s.story_hash.as_str(), s))
        .collect();

    let feed_ids: Vec<i32> = story_rows
        .iter()
        .map(|s| s.story_feed_id)
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .collect();
    let feed_titles: HashMap<i32, String> = feeds::table
        .filter(feeds::id.eq_any(&feed_ids))
        .select((feeds::id, feeds::feed_title))
        .load::<(i32, String)>(&mut conn)
        .await?
        .into_iter()
        .collect();
    drop(conn);

    let overrides = category_overrides(scored, &prefs.sections);

    let prompt_stories: Vec<PromptStory> = scored
        .iter()
        .filter_map(|scored_story| {
            let story = stories_by_hash.get(scored_story.story_hash.as_str())?;
            Some(PromptStory {
                story_hash: scored_story.story_hash.clone(),
                title: story.story_title.clone(),
                feed_title: feed_titles
                    .get(&story.story_feed_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown Feed".to_string()),
                author: story
                    .story_author
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
                date: Some(story.story_date),
                category: overrides
                    .get(&scored_story.story_hash)
                    .cloned()
                    .unwrap_or_else(|| scored_story.category.clone()),
                is_read: scored_story.is_read,
                word_count: scored_story.content_word_count,
                excerpt: story.excerpt(EXCERPT_CHARS),
                classifier_matches: scored_story.classifier_matches.clone(),
            })
        })
        .collect();

    if prompt_stories.is_empty() {
        return Ok(None);
    }

    let system_prompt = build_system_prompt(
        prefs.summary_length.as_str(),
        prefs.summary_style.as_str(),
        &prefs.sections,
        &prefs.custom_section_prompts,
    );
    let user_prompt = build_user_prompt(briefing_date, &prompt_stories);
    let max_tokens = token_budget(scored.len(), prefs.enabled_section_count());

    let Some((html, metadata)) = run_generation(
        &ctx.llm,
        prefs.briefing_model.as_deref(),
        system_prompt,
        user_prompt,
        max_tokens,
    )
    .await
    else {
        tracing::error!(user_id, "briefing summary failed: no provider output");
        return Ok(None);
    };

    let model = resolve_briefing_model(Some(&metadata.model_name));
    let cost = cost_usd(model, metadata.input_tokens, metadata.output_tokens);
    let mut redis = ctx.redis.clone();
    if let Err(err) = crate::llm::costs::record_usage(
        &mut redis,
        metadata.vendor,
        &metadata.model_id,
        "daily_briefing",
        metadata.input_tokens,
        metadata.output_tokens,
        cost,
        Some(user_id),
    )
    .await
    {
        tracing::warn!(?err, "failed to record briefing usage");
    }

    tracing::debug!(
        user_id,
        input_tokens = metadata.input_tokens,
        output_tokens = metadata.output_tokens,
        model = %metadata.model_name,
        "briefing summary generated"
    );

    Ok(Some((html, metadata)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Vendor;
    use crate::llm::provider::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeProvider {
        configured: bool,
        response: String,
        usage: (u32, u32),
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl FakeProvider {
        fn new(configured: bool, response: &str) -> Self {
            Self {
                configured,
                response: response.to_string(),
                usage: (100, 50),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FakeProvider {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn generate(
            &self,
            _messages: &[ChatMessage],
            model_id: &str,
            max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((model_id.to_string(), max_tokens));
            if !self.configured {
                return Err(LlmError::NotConfigured);
            }
            Ok(self.response.clone())
        }

        fn last_usage(&self) -> (u32, u32) {
            self.usage
        }
    }

    fn registry_with(vendor: Vendor, provider: FakeProvider) -> LlmRegistry {
        let mut providers: HashMap<Vendor, Box<dyn LlmProvider>> = HashMap::new();
        providers.insert(vendor, Box::new(provider));
        LlmRegistry::with_providers(providers)
    }

    fn scored(hash: &str, category: &str) -> ScoredStory {
        ScoredStory {
            story_hash: hash.to_string(),
            score: 1.0,
            is_read: false,
            category: category.to_string(),
            content_word_count: 200,
            classifier_matches: vec![],
        }
    }

    #[test]
    fn system_prompt_lists_only_enabled_sections() {
        let mut sections = default_sections();
        sections.insert("long_read".to_string(), false);
        let prompt = build_system_prompt("medium", "bullets", &sections, &[]);
        assert!(prompt.contains("trending_unread"));
        assert!(!prompt.contains("CATEGORY: long_read"));
        assert!(prompt.contains("NB-briefing-summary"));
    }

    #[test]
    fn system_prompt_includes_enabled_custom_sections() {
        let mut sections = default_sections();
        sections.insert("custom_1".to_string(), true);
        let prompts = vec!["rust, cargo".to_string()];
        let prompt = build_system_prompt("medium", "bullets", &sections, &prompts);
        assert!(prompt.contains("KEY: custom_1"));
        assert!(prompt.contains("rust, cargo"));

        // Disabled custom slots stay out
        sections.insert("custom_1".to_string(), false);
        let prompt = build_system_prompt("medium", "bullets", &sections, &prompts);
        assert!(!prompt.contains("KEY: custom_1"));
    }

    #[test]
    fn system_prompt_length_and_style_instructions() {
        let sections = default_sections();
        let prompt = build_system_prompt("short", "editorial", &sections, &[]);
        assert!(prompt.contains("Under 300 words total"));
        assert!(prompt.contains("narrative editorial style"));

        // Unknown values fall back to medium/bullets
        let prompt = build_system_prompt("epic", "interpretive-dance", &sections, &[]);
        assert!(prompt.contains("Under 600 words total"));
        assert!(prompt.contains("concise one-sentence summary"));
    }

    #[test]
    fn disabled_section_categories_remap_in_user_prompt() {
        let mut sections = default_sections();
        sections.insert("long_read".to_string(), false);
        let candidates = vec![scored("1:aaa", "long_read")];
        let overrides = category_overrides(&candidates, &sections);

        let stories = vec![PromptStory {
            story_hash: "1:aaa".to_string(),
            title: "A Long Piece".to_string(),
            feed_title: "Feed".to_string(),
            author: "Alice".to_string(),
            date: None,
            category: overrides
                .get("1:aaa")
                .cloned()
                .unwrap_or_else(|| "long_read".to_string()),
            is_read: false,
            word_count: 900,
            excerpt: String::new(),
            classifier_matches: vec![],
        }];
        let prompt = build_user_prompt(NaiveDateTime::default(), &stories);
        assert!(prompt.contains("CATEGORY: trending_global"));
        assert!(!prompt.contains("CATEGORY: long_read"));
    }

    #[test]
    fn enabled_categories_pass_through_unmapped() {
        let sections = default_sections();
        let candidates = vec![scored("1:aaa", "long_read"), scored("2:bbb", "custom_1")];
        let overrides = category_overrides(&candidates, &sections);
        assert!(overrides.is_empty());
    }

    #[test]
    fn user_prompt_carries_matches_line() {
        let mut story = PromptStory {
            story_hash: "1:aaa".to_string(),
            title: "T".to_string(),
            feed_title: "F".to_string(),
            author: "A".to_string(),
            date: None,
            category: "classifier_match".to_string(),
            is_read: true,
            word_count: 10,
            excerpt: "e".to_string(),
            classifier_matches: vec!["feed:F".to_string(), "author:A".to_string()],
        };
        let prompt = build_user_prompt(NaiveDateTime::default(), std::slice::from_ref(&story));
        assert!(prompt.contains("MATCHES: feed:F, author:A"));
        assert!(prompt.contains("READ_STATUS: read"));

        story.classifier_matches.clear();
        let prompt = build_user_prompt(NaiveDateTime::default(), &[story]);
        assert!(!prompt.contains("MATCHES:"));
    }

    #[test]
    fn token_budget_scales_and_caps() {
        assert_eq!(token_budget(5, 9), 1024 + 400 + 900);
        assert_eq!(token_budget(100, 14), MAX_TOKENS_CEILING);
    }

    #[test]
    fn code_fences_strip() {
        assert_eq!(
            strip_code_fences("```html\n<div>Hi</div>\n```"),
            "<div>Hi</div>"
        );
        assert_eq!(strip_code_fences("<div>Hi</div>"), "<div>Hi</div>");
        assert_eq!(strip_code_fences("  <div>Hi</div>  "), "<div>Hi</div>");
    }

    #[tokio::test]
    async fn generation_uses_requested_model() {
        let registry = registry_with(Vendor::OpenAi, FakeProvider::new(true, "<div>S</div>"));
        let (html, meta) = run_generation(
            &registry,
            Some("gpt-5-mini"),
            "sys".to_string(),
            "user".to_string(),
            2048,
        )
        .await
        .expect("generation should succeed");
        assert_eq!(html, "<div>S</div>");
        assert_eq!(meta.model_name, "gpt-5-mini");
        assert_eq!(meta.vendor, "openai");
        assert_eq!((meta.input_tokens, meta.output_tokens), (100, 50));
    }

    #[tokio::test]
    async fn unconfigured_provider_falls_back_to_default() {
        let mut providers: HashMap<Vendor, Box<dyn LlmProvider>> = HashMap::new();
        providers.insert(
            Vendor::OpenAi,
            Box::new(FakeProvider::new(false, "unused")),
        );
        providers.insert(
            Vendor::Anthropic,
            Box::new(FakeProvider::new(true, "<div>Fallback</div>")),
        );
        let registry = LlmRegistry::with_providers(providers);

        let (html, meta) = run_generation(
            &registry,
            Some("gpt-5-mini"),
            "sys".to_string(),
            "user".to_string(),
            2048,
        )
        .await
        .expect("fallback should succeed");
        assert_eq!(html, "<div>Fallback</div>");
        assert_eq!(meta.model_name, DEFAULT_BRIEFING_MODEL);
        assert_eq!(meta.vendor, "anthropic");
    }

    #[tokio::test]
    async fn no_configured_provider_returns_none() {
        let registry = registry_with(Vendor::Anthropic, FakeProvider::new(false, "unused"));
        let result = run_generation(
            &registry,
            None,
            "sys".to_string(),
            "user".to_string(),
            2048,
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn fenced_output_is_stripped() {
        let registry = registry_with(
            Vendor::Anthropic,
            FakeProvider::new(true, "```html\n<div>S</div>\n```"),
        );
        let (html, _) = run_generation(
            &registry,
            None,
            "sys".to_string(),
            "user".to_string(),
            2048,
        )
        .await
        .unwrap();
        assert_eq!(html, "<div>S</div>");
    }
}
