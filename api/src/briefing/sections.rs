//! Section-contract enforcement on LLM briefing output: key normalization,
//! section extraction and filtering, and the email-safe HTML rewrite pass
//! that inlines styles, favicons and section icons.

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::{Captures, Regex};

use crate::briefing::models::{DEFAULT_SECTION, VALID_SECTION_KEYS};

/// Normalize a section key to the valid set.
///
/// Lowercase and trim, hyphens to underscores, collapse runs of
/// underscores, strip leading/trailing underscores, then fuzzy match by
/// dropping separators entirely. Unknown keys come back as `None`.
pub fn normalize_section_key(key: &str) -> Option<String> {
    static UNDERSCORES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

    if key.is_empty() {
        return None;
    }

    let normalized = key.to_lowercase().trim().replace('-', "_");
    let normalized = UNDERSCORES_RE.replace_all(&normalized, "_");
    let normalized = normalized.trim_matches('_').to_string();

    if VALID_SECTION_KEYS.contains(&normalized.as_str()) {
        return Some(normalized);
    }

    // Fuzzy match: compare with all separators removed
    let key_no_sep = normalized.replace('_', "");
    for valid_key in VALID_SECTION_KEYS {
        if valid_key.replace('_', "") == key_no_sep {
            return Some(valid_key.to_string());
        }
    }

    None
}

static H3_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<h3\s[^>]*?data-section="([^"]+)"[^>]*>"#).unwrap());
static DATA_SECTION_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-section="[^"]+""#).unwrap());
static TRAILING_DIV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*</div>\s*$").unwrap());
static STORY_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-story-hash="([^"]+)""#).unwrap());

/// Split briefing HTML into per-section blocks keyed by their normalized
/// section key, in document order. Blocks with unrecognized keys are dropped
/// with a warning. Each block is rewrapped in the summary div.
pub fn extract_section_summaries(summary_html: &str) -> Vec<(String, String)> {
    if summary_html.is_empty() {
        return Vec::new();
    }

    let matches: Vec<(usize, usize, String, String)> = H3_SECTION_RE
        .captures_iter(summary_html)
        .map(|caps| {
            let whole = caps.get(0).unwrap();
            (
                whole.start(),
                whole.end(),
                whole.as_str().to_string(),
                caps[1].to_string(),
            )
        })
        .collect();

    let mut sections: Vec<(String, String)> = Vec::new();
    for (i, (_, end, h3_tag, raw_key)) in matches.iter().enumerate() {
        let Some(section_key) = normalize_section_key(raw_key) else {
            tracing::warn!(%raw_key, "rejecting invalid briefing section key");
            continue;
        };

        // Rewrite the header to carry the normalized key if it changed
        let h3_tag = if section_key != *raw_key {
            DATA_SECTION_ATTR_RE
                .replace(h3_tag, format!(r#"data-section="{section_key}""#).as_str())
                .to_string()
        } else {
            h3_tag.clone()
        };

        let content_end = matches
            .get(i + 1)
            .map(|(start, ..)| *start)
            .unwrap_or(summary_html.len());
        let content = &summary_html[*end..content_end];
        // The last block may drag the outer wrapper's closing tag with it
        let content = TRAILING_DIV_RE.replace(content, "");

        let block = format!(r#"<div class="NB-briefing-summary">{h3_tag}{content}</div>"#);
        if let Some(existing) = sections.iter_mut().find(|(key, _)| *key == section_key) {
            existing.1 = block;
        } else {
            sections.push((section_key, block));
        }
    }

    sections
}

/// Story hashes referenced in each section's HTML, in order of appearance.
pub fn extract_section_story_hashes(
    section_summaries: &[(String, String)],
) -> HashMap<String, Vec<String>> {
    let mut result = HashMap::new();
    for (key, html) in section_summaries {
        let hashes: Vec<String> = STORY_HASH_RE
            .captures_iter(html)
            .map(|caps| caps[1].to_string())
            .collect();
        if !hashes.is_empty() {
            result.insert(key.clone(), hashes);
        }
    }
    result
}

/// Drop sections whose toggle is off. The default section always survives,
/// and if filtering would leave nothing the original document is returned so
/// the reader still sees the model's output.
pub fn filter_disabled_sections(
    summary_html: &str,
    active_sections: &HashMap<String, bool>,
) -> String {
    static LEADING_WRAPPER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"^<div class="NB-briefing-summary">"#).unwrap());
    static CLOSING_DIV_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</div>$").unwrap());

    if summary_html.is_empty() || active_sections.is_empty() {
        return summary_html.to_string();
    }

    let sections = extract_section_summaries(summary_html);
    if sections.is_empty() {
        return summary_html.to_string();
    }

    let filtered: Vec<&(String, String)> = sections
        .iter()
        .filter(|(key, _)| {
            key == DEFAULT_SECTION || active_sections.get(key).copied().unwrap_or(false)
        })
        .collect();
    if filtered.is_empty() {
        return summary_html.to_string();
    }

    let mut parts = Vec::new();
    for (_, section_html) in filtered {
        let inner = LEADING_WRAPPER_RE.replace(section_html, "");
        let inner = CLOSING_DIV_RE.replace(&inner, "");
        parts.push(inner.to_string());
    }

    format!(
        r#"<div class="NB-briefing-summary">{}</div>"#,
        parts.join("")
    )
}

const PROMPT_SVG: &[u8] = include_bytes!("../../assets/icons/prompt.svg");
const DEFAULT_ICON_SVG: &[u8] = include_bytes!("../../assets/icons/briefing.svg");
const THUMBS_UP_SVG: &[u8] = include_bytes!("../../assets/icons/thumbs-up.svg");

static SECTION_ICONS: &[(&str, &[u8])] = &[
    (
        "trending_unread",
        include_bytes!("../../assets/icons/unread.svg"),
    ),
    ("long_read", include_bytes!("../../assets/icons/scroll.svg")),
    (
        "classifier_match",
        include_bytes!("../../assets/icons/train.svg"),
    ),
    (
        "follow_up",
        include_bytes!("../../assets/icons/boomerang.svg"),
    ),
    (
        "trending_global",
        include_bytes!("../../assets/icons/discover.svg"),
    ),
    ("duplicates", include_bytes!("../../assets/icons/venn.svg")),
    (
        "quick_catchup",
        include_bytes!("../../assets/icons/pulse.svg"),
    ),
    (
        "emerging_topics",
        include_bytes!("../../assets/icons/rocket.svg"),
    ),
    (
        "contrarian_views",
        include_bytes!("../../assets/icons/stack.svg"),
    ),
    ("custom_1", PROMPT_SVG),
    ("custom_2", PROMPT_SVG),
    ("custom_3", PROMPT_SVG),
    ("custom_4", PROMPT_SVG),
    ("custom_5", PROMPT_SVG),
];

/// Everything the icon/style embedding pass needs besides the HTML itself.
pub struct EmbedContext {
    /// story_hash -> favicon data URI
    pub favicon_map: HashMap<String, String>,
    /// story_hash -> feed title, for favicon tooltips
    pub feed_title_map: HashMap<String, String>,
    /// Site base URL for story links, without trailing slash
    pub site_url: String,
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Rewrite briefing HTML for email-compatible rendering: inline CSS on the
/// wrapper and every layout element, favicons as visual bullets ahead of
/// story links, table layout around favicon items, styled classifier pills,
/// and section icons on headers. All icon data URIs are computed at most
/// once per call.
pub fn embed_briefing_icons(summary_html: &str, ctx: &EmbedContext) -> String {
    static WRAPPER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"(<div\s+class="NB-briefing-summary")([^>]*>)"#).unwrap());
    static UL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<ul(?P<attrs>[^>]*)>").unwrap());
    static LI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<li(?P<attrs>[^>]*)>").unwrap());
    static P_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<p(?P<attrs>[^>]*)>").unwrap());
    static STORY_LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"<a\s[^>]*data-story-hash="([^"]+)"[^>]*>"#).unwrap());
    static LI_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)(<li[^>]*>)(.*?)</li>").unwrap());
    static P_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)(<p[^>]*>)(.*?)</p>").unwrap());
    static FAVICON_LEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^(\s*<img[^>]*NB-briefing-inline-favicon[^>]*>)\s*(.*)$").unwrap()
    });
    static PILL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?s)<span\s+class="[^"]*NB-briefing-classifier[^"]*">.*?</label>\s*</span>"#)
            .unwrap()
    });
    static PILL_VALUE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)(<label[^>]*>.*?)<span>").unwrap());
    static PILL_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)<span\s[^>]*NB-briefing-classifier[^>]*>.*?</span>").unwrap()
    });
    static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<a\b([^>]*)>").unwrap());
    static ICON_DIV_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"<div\s+class="NB-classifier-icon-like"[^>]*>\s*</div>"#).unwrap());

    if summary_html.is_empty() {
        return summary_html.to_string();
    }

    let mut icon_cache: HashMap<&str, String> = HashMap::new();
    let mut icon_data_uri = |section_key: &str| -> String {
        let key = SECTION_ICONS
            .iter()
            .find(|(k, _)| *k == section_key)
            .map(|(k, _)| *k)
            .unwrap_or("__default__");
        icon_cache
            .entry(key)
            .or_insert_with(|| {
                let bytes = SECTION_ICONS
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, b)| *b)
                    .unwrap_or(DEFAULT_ICON_SVG);
                format!("data:image/svg+xml;base64,{}", BASE64.encode(bytes))
            })
            .clone()
    };

    // Phase 1: wrapper style
    let wrapper_style =
        "font-family:'Helvetica Neue',Arial,sans-serif;font-size:18px;line-height:1.5;color:#333;";
    let html = WRAPPER_RE.replace_all(summary_html, |caps: &Captures| {
        let attrs = caps[2].trim_end_matches('>');
        format!(r#"{}{} style="{}">"#, &caps[1], attrs, wrapper_style)
    });

    // Phase 2: <ul> loses its disc bullets to make room for favicons
    let ul_style = "list-style:none;margin:0 0 16px 0;padding:0 0 0 22px;";
    let html = UL_RE.replace_all(&html, |caps: &Captures| {
        format!(r#"<ul{} style="{}">"#, &caps["attrs"], ul_style)
    });

    // Phase 3: <li> spacing
    let li_style = "margin:0 0 12px 0;padding:0;line-height:1.5;";
    let html = LI_RE.replace_all(&html, |caps: &Captures| {
        format!(r#"<li{} style="{}">"#, &caps["attrs"], li_style)
    });

    // Phase 4: <p> spacing for editorial/headlines styles
    let p_style = "margin:0 0 12px 0;padding:0 0 0 22px;line-height:1.5;";
    let html = P_RE.replace_all(&html, |caps: &Captures| {
        format!(r#"<p{} style="{}">"#, &caps["attrs"], p_style)
    });

    // Phase 5: story links gain an href and a leading favicon
    let favicon_style = "width:16px;height:16px;border-radius:2px;margin:0;vertical-align:top;";
    let html = STORY_LINK_RE.replace_all(&html, |caps: &Captures| {
        let tag = &caps[0];
        let story_hash = &caps[1];

        let href = format!("{}/briefing?story={}", ctx.site_url, story_hash);
        let tag = tag.replacen(
            r#"class="NB-briefing-story-link""#,
            &format!(r#"href="{href}" class="NB-briefing-story-link""#),
            1,
        );

        let Some(url) = ctx.favicon_map.get(story_hash) else {
            return tag;
        };
        let title_attr = ctx
            .feed_title_map
            .get(story_hash)
            .map(|title| format!(r#" title="{}""#, escape_attr(title)))
            .unwrap_or_default();
        format!(
            r#"<img src="{url}" class="NB-briefing-inline-favicon" style="{favicon_style}"{title_attr}>{tag}"#
        )
    });

    // Phase 5b: table layout keeps favicon and text aligned in email clients
    let tablify = |tag: &str, content: &str, close: &str| -> Option<String> {
        let caps = FAVICON_LEAD_RE.captures(content)?;
        let favicon_img = &caps[1];
        let rest = &caps[2];
        Some(format!(
            r#"{tag}<table cellpadding="0" cellspacing="0" border="0" style="width:100%;"><tr><td style="width:22px;vertical-align:top;padding-top:0;">{favicon_img}</td><td style="vertical-align:top;">{rest}</td></tr></table>{close}"#
        ))
    };
    let html = LI_BLOCK_RE.replace_all(&html, |caps: &Captures| {
        tablify(&caps[1], &caps[2], "</li>").unwrap_or_else(|| caps[0].to_string())
    });

    // Phase 5c: same for <p>, converted to <div> because a table cannot nest
    // inside a paragraph (browsers auto-close the <p>, which breaks layout
    // and font inheritance)
    static P_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<p\b").unwrap());
    let html = P_BLOCK_RE.replace_all(&html, |caps: &Captures| {
        let div_tag = P_OPEN_RE.replace(&caps[1], "<div");
        tablify(&div_tag, &caps[2], "</div>").unwrap_or_else(|| caps[0].to_string())
    });

    // Phase 6: classifier pill inline styles
    let pill_style = "display:inline-block;background-color:#34912E;border:1px solid #202020;\
                      border-radius:14px;padding:1px 8px;font-size:11px;line-height:16px;\
                      margin:0 4px 0 0;white-space:nowrap;vertical-align:text-bottom;\
                      text-decoration:none;";
    let label_style = "color:white;text-decoration:none;";
    let b_style = "color:rgba(255,255,255,0.7);font-weight:normal;text-decoration:none;";
    let value_style = "color:white;text-shadow:1px 1px 0 rgba(0,0,0,0.5);text-decoration:none;";
    let html = PILL_RE.replace_all(&html, |caps: &Captures| {
        let block = caps[0].replacen(
            r#"class="NB-classifier"#,
            &format!(r#"style="{pill_style}" class="NB-classifier"#),
            1,
        );
        let block = block.replace("<label>", &format!(r#"<label style="{label_style}">"#));
        let block = block.replace("<b>", &format!(r#"<b style="{b_style}">"#));
        PILL_VALUE_RE
            .replace(&block, |inner: &Captures| {
                format!(r#"{}<span style="{}">"#, &inner[1], value_style)
            })
            .to_string()
    });

    // Phase 7: swap the pill icon placeholder for an inline thumbs-up,
    // recolored white for the green pill background
    let thumbs_up_svg: Vec<u8> = {
        let svg = String::from_utf8_lossy(THUMBS_UP_SVG);
        svg.replace(r##"fill="#FFC021""##, r##"fill="#FFFFFF""##)
            .into_bytes()
    };
    let thumbs_up_style =
        "display:inline-block;width:12px;height:12px;vertical-align:middle;margin:0 3px 0 0;";
    let thumbs_up_img = format!(
        r#"<img src="data:image/svg+xml;base64,{}" class="NB-classifier-icon-like" style="{}" alt="">"#,
        BASE64.encode(&thumbs_up_svg),
        thumbs_up_style,
    );
    let html = ICON_DIV_RE.replace_all(&html, thumbs_up_img.as_str());

    // Phase 7b: mail clients auto-link domains inside pills; force those
    // anchors back to white with no underline
    let auto_link_style = "color:white;text-decoration:none;";
    let html = PILL_SPAN_RE.replace_all(&html, |caps: &Captures| {
        ANCHOR_RE
            .replace_all(&caps[0], |anchor: &Captures| {
                format!(r#"<a{} style="{}">"#, &anchor[1], auto_link_style)
            })
            .to_string()
    });

    // Phase 8: style section headers and prefix their icons
    let h3_style = "font-size:16px;font-weight:bold;color:#2d5273;margin:24px 0 10px 0;\
                    padding-bottom:6px;border-bottom:2px solid #e8e8e8;";
    let section_icon_style =
        "display:inline-block;width:1em;height:1em;vertical-align:-0.1em;margin:0 0.3em 0 0;";
    let html = H3_SECTION_RE.replace_all(&html, |caps: &Captures| {
        let styled_tag = caps[0].replacen('>', &format!(r#" style="{h3_style}">"#), 1);
        let data_uri = icon_data_uri(&caps[1]);
        format!(
            r#"{styled_tag}<img src="{data_uri}" class="NB-briefing-section-icon" style="{section_icon_style}">"#
        )
    });

    html.to_string()
}
