use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider::{ChatMessage, LlmError, LlmProvider, MessageRole};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Shared client for the OpenAI chat-completions wire format, which xAI
/// also speaks.
pub(super) struct OpenAiCompatClient {
    api_key: Option<String>,
    http: reqwest::Client,
    base_url: String,
    last_usage: Mutex<(u32, u32)>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    max_completion_tokens: u32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiCompatClient {
    fn new(api_key: Option<String>, http: reqwest::Client, base_url: &str) -> Self {
        Self {
            api_key,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_usage: Mutex::new((0, 0)),
        }
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;

        let wire: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let request = CompletionRequest {
            model: model_id,
            max_completion_tokens: max_tokens,
            messages: wire,
        };

        tracing::debug!(model = model_id, url = %self.base_url, "chat completion request");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let body: CompletionResponse = response.json().await?;
        if let (Some(usage), Ok(mut last)) = (&body.usage, self.last_usage.lock()) {
            *last = (usage.prompt_tokens, usage.completion_tokens);
        }
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn last_usage(&self) -> (u32, u32) {
        self.last_usage.lock().map(|usage| *usage).unwrap_or((0, 0))
    }
}

pub struct OpenAiProvider {
    client: OpenAiCompatClient,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>, http: reqwest::Client) -> Self {
        Self {
            client: OpenAiCompatClient::new(api_key, http, OPENAI_API_URL),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.client.generate(messages, model_id, max_tokens).await
    }

    fn last_usage(&self) -> (u32, u32) {
        self.client.last_usage()
    }
}

const XAI_API_URL: &str = "https://api.x.ai/v1";

pub struct XaiProvider {
    client: OpenAiCompatClient,
}

impl XaiProvider {
    pub fn new(api_key: Option<String>, http: reqwest::Client) -> Self {
        Self {
            client: OpenAiCompatClient::new(api_key, http, XAI_API_URL),
        }
    }
}

#[async_trait]
impl LlmProvider for XaiProvider {
    fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.client.generate(messages, model_id, max_tokens).await
    }

    fn last_usage(&self) -> (u32, u32) {
        self.client.last_usage()
    }
}
