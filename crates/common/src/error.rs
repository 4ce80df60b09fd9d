//! Error taxonomy for Cortex.
//!
//! Only [`CortexError::Validation`] ever crosses the orchestrator boundary as
//! an `Err`. Every other class is recovered inside the pipeline and surfaces
//! as data on the returned `ExecutionResult`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Memory unavailable: {0}")]
    MemoryUnavailable(String),

    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    #[error("Composition error: {0}")]
    Composition(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM provider returned {status}: {body}")]
    LlmStatus { status: u16, body: String },

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CortexError {
    /// Whether a provider call that failed with this error may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            CortexError::LlmStatus { status, .. } => *status == 429 || *status >= 500,
            CortexError::Llm(_) | CortexError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Stable machine-readable code, used in logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            CortexError::Validation(_) => "VALIDATION_ERROR",
            CortexError::Classification(_) => "CLASSIFICATION_ERROR",
            CortexError::MemoryUnavailable(_) => "MEMORY_UNAVAILABLE",
            CortexError::ToolExecution(_) => "TOOL_EXECUTION_ERROR",
            CortexError::Composition(_) => "COMPOSITION_ERROR",
            CortexError::Llm(_) | CortexError::LlmStatus { .. } => "LLM_ERROR",
            CortexError::Timeout(_) => "TIMEOUT",
            CortexError::Config(_) => "CONFIG_ERROR",
            CortexError::Io(_) => "IO_ERROR",
            CortexError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CortexError>;
