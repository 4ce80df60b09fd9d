//! The structured result returned for every orchestrated request.

use serde::{Deserialize, Serialize};

use crate::{MemoryContext, QueryIntent};

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRunRecord {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Not run because a declared upstream tool did not succeed
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub attempts: u32,
}

impl ToolRunRecord {
    pub fn succeeded(
        tool_name: impl Into<String>,
        data: serde_json::Value,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
            skipped: false,
            attempts,
        }
    }

    pub fn failed(
        tool_name: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
            skipped: false,
            attempts,
        }
    }

    pub fn skipped(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            data: None,
            error: Some(reason.into()),
            duration_ms: 0,
            skipped: true,
            attempts: 0,
        }
    }
}

/// Per-stage wall-clock timings, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub classification_time: u64,
    pub memory_search_time: u64,
    pub tool_execution_time: u64,
    pub llm_response_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Total wall-clock time for the request
    pub execution_time: u64,
    /// Episodic plus semantic memories in the context
    pub memory_retrieved: usize,
    /// Tool runs that succeeded
    pub tools_executed: usize,
    pub confidence: f32,
    pub classification_time: u64,
    pub memory_search_time: u64,
    pub tool_execution_time: u64,
    pub llm_response_time: u64,
    /// A memory store failed while assembling context
    #[serde(default)]
    pub degraded_context: bool,
    /// The caller's deadline cut the pipeline short
    #[serde(default)]
    pub deadline_exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub response: String,
    pub intent: QueryIntent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_context: Option<MemoryContext>,
    pub tool_results: Vec<ToolRunRecord>,
    pub reasoning: String,
    pub metadata: ExecutionMetadata,
    /// Set when the terminal completion failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failed_tools(&self) -> impl Iterator<Item = &ToolRunRecord> {
        self.tool_results.iter().filter(|r| !r.success)
    }
}
