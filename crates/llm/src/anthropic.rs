use async_trait::async_trait;
use cortex_common::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
use crate::transport::{decode_error, ensure_success, transport_error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const PROVIDER: &str = "Anthropic";

/// Appended to the system prompt in JSON mode; the Messages API has no
/// response-format switch.
const JSON_ONLY_SUFFIX: &str = "Respond with a single JSON object and nothing else.";

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicClient {
    model: String,
    api_key: String,
    api_url: String,
    http_client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            api_url: ANTHROPIC_API_URL.to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn build_request_body(&self, request: &LlmRequest) -> AnthropicRequest {
        // System turns go in the top-level field, never in `messages`.
        let messages = request
            .messages
            .iter()
            .filter(|msg| msg.role != Role::System)
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                }
                .to_string(),
                content: vec![AnthropicContent {
                    content_type: "text".to_string(),
                    text: msg.content.clone(),
                }],
            })
            .collect();

        let system = match (&request.system_prompt, request.json_mode) {
            (Some(s), true) => Some(format!("{s}\n\n{JSON_ONLY_SUFFIX}")),
            (None, true) => Some(JSON_ONLY_SUFFIX.to_string()),
            (s, false) => s.clone(),
        };

        AnthropicRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            system,
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(&request);
        debug!(model = %body.model, messages = body.messages.len(), "Anthropic completion");

        let response = self
            .http_client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;
        let response = ensure_success(PROVIDER, response).await?;

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| decode_error(PROVIDER, e))?;

        let content = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            model: anthropic_response.model,
            usage: anthropic_response.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
            finish_reason: anthropic_response.stop_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
