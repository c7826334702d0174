mod ollama;
mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;

use crate::config::ProviderSettings;
use crate::recipe::LlmParams;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Rendered prompt for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
}

/// Per-call parameters, taken from the recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model_fallback: Option<String>,
}

impl From<&LlmParams> for CompletionParams {
    fn from(params: &LlmParams) -> Self {
        CompletionParams {
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            model_fallback: params.model_fallback.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider timed out")]
    Timeout,

    #[error("provider rejected credentials: {0}")]
    AuthFailure(String),

    #[error("provider rate limited the request")]
    RateLimited,

    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// A text-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short backend name, e.g. "openrouter".
    fn name(&self) -> &str;

    /// Model used when the recipe does not override it.
    fn model(&self) -> &str;

    /// Upper bound for a single call.
    fn timeout(&self) -> Duration;

    async fn complete(
        &self,
        prompt: &Prompt,
        params: &CompletionParams,
    ) -> Result<String, ProviderError>;

    /// Check that the backend is reachable and accepts our credentials.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Instantiate the configured backend, or `None` when AI curation is disabled
pub fn build_provider(settings: &ProviderSettings) -> Option<Arc<dyn CompletionProvider>> {
    match settings {
        ProviderSettings::Disabled => None,
        ProviderSettings::Cloud(cloud) => Some(Arc::new(OpenAiCompatibleProvider::new(cloud.clone()))),
        ProviderSettings::Local(local) => Some(Arc::new(OllamaProvider::new(local.clone()))),
    }
}

/// Model precedence: explicitly configured, then recipe fallback, then backend default
fn resolve_model(configured: Option<&str>, params: &CompletionParams, default: &str) -> String {
    configured
        .or(params.model_fallback.as_deref())
        .unwrap_or(default)
        .to_string()
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

fn chat_messages(prompt: &Prompt) -> Vec<ChatMessage<'_>> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = prompt.system.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &prompt.user,
    });
    messages
}

fn classify_ureq_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(code @ (401 | 403), response) => {
            ProviderError::AuthFailure(format!("HTTP {code}: {}", error_body(response)))
        }
        ureq::Error::Status(429, _) => ProviderError::RateLimited,
        ureq::Error::Status(code, response) => {
            ProviderError::Unreachable(format!("HTTP {code}: {}", error_body(response)))
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                ProviderError::Timeout
            } else {
                ProviderError::Unreachable(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    use std::error::Error as _;

    let io_timeout = transport
        .source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        });

    io_timeout || transport.to_string().contains("timed out")
}

fn error_body(response: ureq::Response) -> String {
    let body = response.into_string().unwrap_or_default();
    body.chars().take(200).collect()
}

/// Run a blocking HTTP call on the blocking pool
async fn run_blocking<T, F>(call: F) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ProviderError::Unreachable(format!("provider task failed: {e}")))?
}
