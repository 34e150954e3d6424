//! LLM provider registry and model catalog for briefing generation.

use std::collections::HashMap;

use crate::config::ServerConfig;

pub mod anthropic;
pub mod costs;
pub mod google;
pub mod openai;
pub mod provider;

use anthropic::AnthropicProvider;
use google::GoogleProvider;
use openai::{OpenAiProvider, XaiProvider};
use provider::LlmProvider;

pub const DEFAULT_BRIEFING_MODEL: &str = "claude-haiku";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Anthropic,
    OpenAi,
    Google,
    Xai,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Anthropic => "anthropic",
            Vendor::OpenAi => "openai",
            Vendor::Google => "google",
            Vendor::Xai => "xai",
        }
    }
}

/// One selectable briefing model. Prices are USD per million tokens and feed
/// the cost recorder.
pub struct BriefingModel {
    pub name: &'static str,
    pub display_name: &'static str,
    pub vendor: Vendor,
    pub model_id: &'static str,
    pub input_price_per_mtok: f64,
    pub output_price_per_mtok: f64,
}

pub static BRIEFING_MODELS: &[BriefingModel] = &[
    BriefingModel {
        name: "claude-haiku",
        display_name: "Claude Haiku 4.5",
        vendor: Vendor::Anthropic,
        model_id: "claude-haiku-4-5",
        input_price_per_mtok: 1.0,
        output_price_per_mtok: 5.0,
    },
    BriefingModel {
        name: "claude-sonnet",
        display_name: "Claude Sonnet 4.5",
        vendor: Vendor::Anthropic,
        model_id: "claude-sonnet-4-5",
        input_price_per_mtok: 3.0,
        output_price_per_mtok: 15.0,
    },
    BriefingModel {
        name: "gpt-5-mini",
        display_name: "GPT-5 Mini",
        vendor: Vendor::OpenAi,
        model_id: "gpt-5-mini",
        input_price_per_mtok: 0.25,
        output_price_per_mtok: 2.0,
    },
    BriefingModel {
        name: "gemini-flash",
        display_name: "Gemini 2.5 Flash",
        vendor: Vendor::Google,
        model_id: "gemini-2.5-flash",
        input_price_per_mtok: 0.3,
        output_price_per_mtok: 2.5,
    },
    BriefingModel {
        name: "grok-4-fast",
        display_name: "Grok 4 Fast",
        vendor: Vendor::Xai,
        model_id: "grok-4-fast-non-reasoning",
        input_price_per_mtok: 0.2,
        output_price_per_mtok: 0.5,
    },
];

/// Look up a registered model by name; unknown or absent names resolve to
/// the default briefing model.
pub fn resolve_briefing_model(name: Option<&str>) -> &'static BriefingModel {
    name.and_then(|n| BRIEFING_MODELS.iter().find(|m| m.name == n))
        .unwrap_or_else(|| {
            BRIEFING_MODELS
                .iter()
                .find(|m| m.name == DEFAULT_BRIEFING_MODEL)
                .expect("default briefing model must be registered")
        })
}

pub fn is_registered_model(name: &str) -> bool {
    BRIEFING_MODELS.iter().any(|m| m.name == name)
}

pub fn cost_usd(model: &BriefingModel, input_tokens: u32, output_tokens: u32) -> f64 {
    (input_tokens as f64 * model.input_price_per_mtok
        + output_tokens as f64 * model.output_price_per_mtok)
        / 1_000_000.0
}

/// The four concrete providers behind one capability surface.
pub struct LlmRegistry {
    providers: HashMap<Vendor, Box<dyn LlmProvider>>,
}

impl LlmRegistry {
    pub fn from_config(config: &ServerConfig, http: reqwest::Client) -> Self {
        let mut providers: HashMap<Vendor, Box<dyn LlmProvider>> = HashMap::new();
        providers.insert(
            Vendor::Anthropic,
            Box::new(AnthropicProvider::new(
                config.anthropic_api_key.clone(),
                http.clone(),
            )),
        );
        providers.insert(
            Vendor::OpenAi,
            Box::new(OpenAiProvider::new(
                config.openai_api_key.clone(),
                http.clone(),
            )),
        );
        providers.insert(
            Vendor::Google,
            Box::new(GoogleProvider::new(
                config.google_api_key.clone(),
                http.clone(),
            )),
        );
        providers.insert(
            Vendor::Xai,
            Box::new(XaiProvider::new(config.xai_api_key.clone(), http)),
        );
        Self { providers }
    }

    /// Registry with explicit providers; test seams inject fakes here.
    pub fn with_providers(providers: HashMap<Vendor, Box<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider(&self, vendor: Vendor) -> Option<&dyn LlmProvider> {
        self.providers.get(&vendor).map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_default() {
        let model = resolve_briefing_model(Some("definitely-not-registered"));
        assert_eq!(model.name, DEFAULT_BRIEFING_MODEL);
        assert_eq!(resolve_briefing_model(None).name, DEFAULT_BRIEFING_MODEL);
    }

    #[test]
    fn registered_model_resolves_to_itself() {
        let model = resolve_briefing_model(Some("gpt-5-mini"));
        assert_eq!(model.name, "gpt-5-mini");
        assert_eq!(model.vendor, Vendor::OpenAi);
    }

    #[test]
    fn cost_scales_with_tokens() {
        let model = resolve_briefing_model(Some("claude-haiku"));
        let cost = cost_usd(model, 1_000_000, 0);
        assert!((cost - model.input_price_per_mtok).abs() < 1e-9);
        assert_eq!(cost_usd(model, 0, 0), 0.0);
    }
}
