//! Tool error types.

use cortex_common::CortexError;
use thiserror::Error;

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {name}")]
    NotFound { name: String },

    #[error("tool already registered: {name}")]
    AlreadyRegistered { name: String },

    /// Arguments failed schema validation or deserialization
    #[error("invalid input for tool '{tool}': {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("tool '{tool}' execution failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("tool '{tool}' execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { tool: String, timeout_ms: u64 },

    #[error("permission denied for tool '{tool}': {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl ToolError {
    pub fn invalid_input(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::InvalidInput {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(tool: &str, reason: impl Into<String>) -> Self {
        ToolError::ExecutionFailed {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether invoking again with the same arguments might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::ExecutionFailed { .. } | ToolError::ExecutionTimeout { .. }
        )
    }
}

impl From<ToolError> for CortexError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::ExecutionTimeout { timeout_ms, .. } => CortexError::Timeout(timeout_ms),
            ToolError::Config { reason } => CortexError::Config(reason),
            other => CortexError::ToolExecution(other.to_string()),
        }
    }
}
