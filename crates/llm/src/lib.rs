//! Completion clients for Cortex.
//!
//! Every component that talks to a model goes through [`LlmClient`]. The
//! concrete providers are wrapped by [`build_llm_client`] in a retrying layer
//! and a concurrency limit.

pub mod anthropic;
pub mod client;
pub mod config;
pub mod openai;
pub mod retry;
mod transport;

pub use anthropic::AnthropicClient;
pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{build_llm_client, LlmConfig, SemaphoredClient};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
