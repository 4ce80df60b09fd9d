use async_trait::async_trait;
use cortex_common::{CortexError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retries transient provider failures with exponential backoff.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay requested by the provider via `Retry-After`, in millis.
    fn retry_after_ms(error: &CortexError) -> Option<u64> {
        let CortexError::LlmStatus { body, .. } = error else {
            return None;
        };
        let lower = body.to_lowercase();
        let pos = lower.find("retry-after")?;
        body[pos..]
            .split_whitespace()
            .skip(1)
            .map(|word| word.trim_matches(|c: char| !c.is_ascii_digit()))
            .find_map(|digits| digits.parse::<u64>().ok())
            .map(|secs| secs * 1000)
    }

    fn compute_delay(&self, attempt: u32) -> u64 {
        let base = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);
        let jitter = (base * 0.1 * jitter_fraction(attempt)) as u64;
        (base as u64)
            .saturating_add(jitter)
            .min(self.config.max_delay_ms)
    }
}

/// Deterministic jitter in [0, 1) derived from the attempt number.
fn jitter_fraction(attempt: u32) -> f64 {
    let x = attempt.wrapping_add(1).wrapping_mul(2_654_435_761);
    (x % 100) as f64 / 100.0
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.max_retries && e.is_retryable() => {
                    let delay = Self::retry_after_ms(&e)
                        .unwrap_or_else(|| self.compute_delay(attempt))
                        .min(self.config.max_delay_ms);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay,
                        error = %e,
                        "Retrying LLM request"
                    );

                    tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error a fixed number of times, then succeeds.
    struct FlakyClient {
        failures: u32,
        status: u16,
        calls: AtomicU32,
    }

    impl FlakyClient {
        fn new(failures: u32, status: u16) -> Self {
            Self {
                failures,
                status,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CortexError::LlmStatus {
                    status: self.status,
                    body: "transient".into(),
                })
            } else {
                Ok(LlmResponse::text("flaky", "ok"))
            }
        }
        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_retry_after_from_error() {
        let err = CortexError::LlmStatus {
            status: 429,
            body: "OpenAI: too many requests (Retry-After: 5)".into(),
        };
        assert_eq!(RetryingClient::<FlakyClient>::retry_after_ms(&err), Some(5000));
        assert_eq!(
            RetryingClient::<FlakyClient>::retry_after_ms(&CortexError::Timeout(10)),
            None
        );
    }

    #[test]
    fn compute_delay_respects_max() {
        let client = RetryingClient::new(
            FlakyClient::new(0, 500),
            RetryConfig {
                max_retries: 5,
                initial_delay_ms: 500,
                max_delay_ms: 2000,
                backoff_multiplier: 10.0,
            },
        );
        assert!(client.compute_delay(5) <= 2000);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let client = RetryingClient::new(FlakyClient::new(2, 503), fast_config(3));
        let response = client.complete(LlmRequest::prompt("hi")).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let client = RetryingClient::new(FlakyClient::new(10, 429), fast_config(2));
        let err = client.complete(LlmRequest::prompt("hi")).await.unwrap_err();
        assert!(matches!(err, CortexError::LlmStatus { status: 429, .. }));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let client = RetryingClient::new(FlakyClient::new(1, 401), fast_config(3));
        assert!(client.complete(LlmRequest::prompt("hi")).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }
}
