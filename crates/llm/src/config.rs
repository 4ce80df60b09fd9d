use std::sync::Arc;

use async_trait::async_trait;
use cortex_common::{CortexError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anthropic::AnthropicClient;
use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

/// Provider selection and transport settings for the completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" (any OpenAI-compatible endpoint, including Ollama) or "anthropic"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// If unset, read from OPENAI_API_KEY / ANTHROPIC_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "llama3.2".into()
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_url: None,
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from config or environment variables.
    ///
    /// An explicit non-empty `api_key` wins; otherwise the provider's
    /// conventional environment variable is consulted.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }

        let env_var = match self.provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => return None,
        };

        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }
}

/// Caps the number of in-flight completions across all callers.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CortexError::Llm(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Build the provider client wrapped in retry and concurrency limits.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let api_key = config.resolve_api_key();

    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" | "ollama" => Box::new(OpenAiClient::new(
            config.api_url.clone(),
            config.model.clone(),
            api_key,
        )),
        "anthropic" => {
            let api_key = api_key.ok_or_else(|| {
                CortexError::Config(
                    "Anthropic requires an API key (set ANTHROPIC_API_KEY)".to_string(),
                )
            })?;
            let client = AnthropicClient::new(config.model.clone(), api_key);
            match &config.api_url {
                Some(url) => Box::new(client.with_api_url(url.clone())),
                None => Box::new(client),
            }
        }
        other => {
            return Err(CortexError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    info!(
        provider = %config.provider,
        model = %config.model,
        max_concurrent = config.max_concurrent_requests,
        "LLM client configured"
    );

    let retrying: Box<dyn LlmClient> =
        Box::new(RetryingClient::new(base_client, config.retry.clone()));

    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
provider = "openai"
model = "llama3"
api_url = "http://localhost:11434"
max_concurrent_requests = 8

[retry]
max_retries = 5
initial_delay_ms = 1000
max_delay_ms = 60000
backoff_multiplier = 3.0
"#;

    fn config(provider: &str, model: &str, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn deserialize_config_from_toml() {
        let config: LlmConfig = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:11434"));
        assert!(config.api_key.is_none());
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
    }

    #[test]
    fn deserialize_config_defaults() {
        let config: LlmConfig = toml::from_str("").unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn explicit_api_key_wins() {
        let config = config("anthropic", "claude", Some("sk-ant-explicit"));
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-ant-explicit"));
    }

    #[test]
    fn unknown_provider_has_no_env_key() {
        let config = config("gemini", "gemini-pro", None);
        assert!(config.resolve_api_key().is_none());
    }

    #[test]
    fn build_openai_client() {
        let client = build_llm_client(&config("openai", "llama3", None)).unwrap();
        assert_eq!(client.model_name(), "llama3");
    }

    #[test]
    fn build_anthropic_client() {
        let client =
            build_llm_client(&config("anthropic", "claude-sonnet-4-20250514", Some("sk-ant-test")))
                .unwrap();
        assert_eq!(client.model_name(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn build_unknown_provider_fails() {
        let err = build_llm_client(&config("gemini", "gemini-pro", None))
            .err()
            .unwrap();
        assert!(matches!(err, CortexError::Config(_)));
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse::text("test", "ok"))
            }
            fn model_name(&self) -> &str {
                "test"
            }
        }

        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let inner = Arc::new(CountingClient {
            concurrent: concurrent.clone(),
            max_seen: max_seen.clone(),
        });

        let semaphored = Arc::new(SemaphoredClient::new(inner, 2));

        let mut handles = vec![];
        for _ in 0..6 {
            let client = semaphored.clone();
            handles.push(tokio::spawn(async move {
                client.complete(LlmRequest::default()).await.unwrap();
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
