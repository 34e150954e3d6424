use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Failures a provider call can surface. The orchestrator traps these,
/// logs, and reports a null summary; anything else is a programmer error
/// and propagates.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("empty response")]
    EmptyResponse,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Whether credentials for this provider are present.
    fn is_configured(&self) -> bool;

    /// Run one completion and return the raw text output.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// `(input_tokens, output_tokens)` of the most recent successful call.
    fn last_usage(&self) -> (u32, u32);
}
