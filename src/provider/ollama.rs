use super::{
    ChatMessage, CompletionParams, CompletionProvider, Prompt, ProviderError, chat_messages,
    classify_ureq_error, resolve_model, run_blocking,
};
use crate::config::LocalProviderSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use ureq::{Agent, AgentBuilder};

const DEFAULT_MODEL: &str = "llama3.2";

/// Connects to an Ollama server and uses its `/api/chat` endpoint
pub struct OllamaProvider {
    agent: Agent,
    base_url: String,
    configured_model: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn new(settings: LocalProviderSettings) -> Self {
        let agent = AgentBuilder::new().timeout(settings.timeout).build();

        OllamaProvider {
            agent,
            base_url: normalize_base_url(&settings.base_url),
            configured_model: settings.model,
            timeout: settings.timeout,
        }
    }
}

/// Accept the server root as well as OpenAI-style or native chat URLs
fn normalize_base_url(url: &str) -> String {
    let mut base = url.trim().trim_end_matches('/');
    for suffix in ["/v1/chat/completions", "/api/chat", "/v1"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped;
            break;
        }
    }
    base.to_string()
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        self.configured_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        params: &CompletionParams,
    ) -> Result<String, ProviderError> {
        let model = resolve_model(self.configured_model.as_deref(), params, DEFAULT_MODEL);
        let url = format!("{}/api/chat", self.base_url);

        let body = serde_json::to_value(OllamaChatRequest {
            model: model.clone(),
            messages: chat_messages(prompt),
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        })
        .map_err(|e| ProviderError::MalformedResponse(format!("request encoding: {e}")))?;

        debug!(model = %model, prompt_chars = prompt.user.len(), "Sending completion request to Ollama");

        let agent = self.agent.clone();
        let response: OllamaChatResponse = run_blocking(move || {
            agent
                .post(&url)
                .send_json(body)
                .map_err(classify_ureq_error)?
                .into_json()
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
        })
        .await?;

        response
            .message
            .map(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse("empty message from Ollama".to_string()))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let agent = self.agent.clone();
        let url = format!("{}/api/tags", self.base_url);

        run_blocking(move || agent.get(&url).call().map(|_| ()).map_err(classify_ureq_error)).await
    }
}
