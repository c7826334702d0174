use super::{
    ChatMessage, CompletionParams, CompletionProvider, Prompt, ProviderError, chat_messages,
    classify_ureq_error, resolve_model, run_blocking,
};
use crate::config::{CloudProviderSettings, CloudService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use ureq::{Agent, AgentBuilder};

pub struct OpenAiCompatibleProvider {
    agent: Agent,
    service: CloudService,
    api_key: String,
    url: String,
    configured_model: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(settings: CloudProviderSettings) -> Self {
        let agent = AgentBuilder::new().timeout(settings.timeout).build();

        OpenAiCompatibleProvider {
            agent,
            service: settings.service,
            api_key: settings.api_key,
            url: settings.base_url,
            configured_model: settings.model,
            timeout: settings.timeout,
        }
    }

    fn models_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        match base.strip_suffix("/chat/completions") {
            Some(root) => format!("{root}/models"),
            None => format!("{base}/models"),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn model(&self) -> &str {
        self.configured_model
            .as_deref()
            .unwrap_or(self.service.default_model())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        params: &CompletionParams,
    ) -> Result<String, ProviderError> {
        let model = resolve_model(
            self.configured_model.as_deref(),
            params,
            self.service.default_model(),
        );

        let body = serde_json::to_value(ChatRequest {
            model: model.clone(),
            messages: chat_messages(prompt),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        })
        .map_err(|e| ProviderError::MalformedResponse(format!("request encoding: {e}")))?;

        debug!(
            provider = self.service.name(),
            model = %model,
            prompt_chars = prompt.user.len(),
            "Sending chat completion request"
        );

        let agent = self.agent.clone();
        let url = self.url.clone();
        let authorization = format!("Bearer {}", self.api_key);

        let response: ChatResponse = run_blocking(move || {
            agent
                .post(&url)
                .set("Authorization", &authorization)
                .set("Content-Type", "application/json")
                .set("X-Title", "MagicLists")
                .send_json(body)
                .map_err(classify_ureq_error)?
                .into_json()
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
        })
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse("no message content in choices".to_string()))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let agent = self.agent.clone();
        let url = self.models_url();
        let authorization = format!("Bearer {}", self.api_key);

        run_blocking(move || {
            agent
                .get(&url)
                .set("Authorization", &authorization)
                .call()
                .map(|_| ())
                .map_err(classify_ureq_error)
        })
        .await
    }
}
