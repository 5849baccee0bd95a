//! OpenRouter chat-completions persona generator.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::pipeline::types::{PersonaGenerator, PersonaRequest};
use crate::providers::map_status;

pub const DEFAULT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "anthropic/claude-3-haiku";
const PROVIDER: &str = "openrouter";
const REFERER: &str = "https://github.com/outreach-gate";

pub struct OpenRouterGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    url: String,
    timeout: Duration,
}

impl OpenRouterGenerator {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            url: DEFAULT_URL.into(),
            timeout,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_content(body: &str) -> Result<String, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "response has no message content".into(),
        })
}

#[async_trait]
impl PersonaGenerator for OpenRouterGenerator {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: &PersonaRequest) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.contact_summary,
                },
            ],
            temperature: 0.3,
            max_tokens: 600,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .header("HTTP-Referer", REFERER)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: PROVIDER.into(),
                        timeout: self.timeout,
                    }
                } else {
                    ProviderError::RequestFailed {
                        provider: PROVIDER.into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        map_status(PROVIDER, resp.status())?;
        let text = resp.text().await.map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
        tracing::debug!(contact_id = %request.contact_id, model = %self.model, "Persona generated");
        extract_content(&text)
    }
}
