//! Request options for the `execute` and `classify` operations.
//!
//! Validation happens here, before the orchestrator runs. Anything rejected
//! is a [`CortexError::Validation`] and is never retried.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{CortexError, IntentType, QueryIntent, Result};

pub const MAX_QUERY_LENGTH: usize = 10_000;
pub const MAX_IDENTIFIER_LENGTH: usize = 128;
pub const MAX_MEMORY_RESULTS: usize = 100;

/// How much of the heavy payload the caller wants back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDetail {
    /// Everything, including raw vectors
    #[default]
    Full,
    /// Memory records without vectors
    Summary,
    /// No memory objects; counters only
    Minimal,
}

/// Options accepted by `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    pub user_id: String,
    pub session_id: String,

    #[serde(default = "default_true")]
    pub include_memory_context: bool,

    #[serde(default = "default_max_memory_results")]
    pub max_memory_results: usize,

    #[serde(default = "default_true")]
    pub include_reasoning: bool,

    /// Model override for every completion in this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature for the answer-producing completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub previous_intents: Vec<QueryIntent>,

    /// Skip classification and force this intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_intent: Option<String>,

    /// Arguments supplied directly, keyed by tool name
    #[serde(default)]
    pub tool_args: HashMap<String, serde_json::Value>,

    /// Declared data dependencies: tool name -> upstream tool names
    #[serde(default)]
    pub tool_dependencies: HashMap<String, Vec<String>>,

    /// Run independent tools concurrently
    #[serde(default)]
    pub parallel_tools: bool,

    #[serde(default)]
    pub detail: ResponseDetail,

    /// Overall deadline, checked between pipeline stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,

    /// ID of the record written for this turn; never truncated away
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_record_id: Option<String>,

    /// Free-form caller context forwarded to the classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_max_memory_results() -> usize {
    10
}

impl ExecuteOptions {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            include_memory_context: true,
            max_memory_results: default_max_memory_results(),
            include_reasoning: true,
            model: None,
            temperature: None,
            previous_intents: Vec::new(),
            hint_intent: None,
            tool_args: HashMap::new(),
            tool_dependencies: HashMap::new(),
            parallel_tools: false,
            detail: ResponseDetail::Full,
            deadline_ms: None,
            pinned_record_id: None,
            user_context: None,
        }
    }

    pub fn without_memory(mut self) -> Self {
        self.include_memory_context = false;
        self
    }

    pub fn with_hint(mut self, intent: IntentType) -> Self {
        self.hint_intent = Some(intent.as_str().to_string());
        self
    }

    pub fn with_tool_args(mut self, tool: impl Into<String>, args: serde_json::Value) -> Self {
        self.tool_args.insert(tool.into(), args);
        self
    }

    pub fn with_dependency(mut self, tool: impl Into<String>, upstream: impl Into<String>) -> Self {
        self.tool_dependencies
            .entry(tool.into())
            .or_default()
            .push(upstream.into());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel_tools = true;
        self
    }

    /// Validate the request and parse `hint_intent`.
    pub fn validate(&self, query: &str) -> Result<Option<IntentType>> {
        validate_query(query)?;
        validate_identifier("userId", &self.user_id)?;
        validate_identifier("sessionId", &self.session_id)?;

        if self.max_memory_results > MAX_MEMORY_RESULTS {
            return Err(CortexError::Validation(format!(
                "maxMemoryResults must be at most {}, got {}",
                MAX_MEMORY_RESULTS, self.max_memory_results
            )));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) || t.is_nan() {
                return Err(CortexError::Validation(format!(
                    "temperature must be within [0, 2], got {}",
                    t
                )));
            }
        }

        self.hint_intent
            .as_deref()
            .map(str::parse::<IntentType>)
            .transpose()
    }
}

/// Hints accepted by `classify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyHints {
    #[serde(default)]
    pub previous_intents: Vec<QueryIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<serde_json::Value>,
    /// Model override for the classification completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ClassifyHints {
    /// Reject hints that carry a malformed `userId`.
    pub fn validate(&self) -> Result<()> {
        let Some(user_id) = self.user_context.as_ref().and_then(|c| c.get("userId")) else {
            return Ok(());
        };
        match user_id.as_str() {
            Some(id) => validate_identifier("userContext.userId", id),
            None => Err(CortexError::Validation(
                "userContext.userId must be a string".into(),
            )),
        }
    }
}

pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(CortexError::Validation("query must not be empty".into()));
    }
    if query.len() > MAX_QUERY_LENGTH {
        return Err(CortexError::Validation(format!(
            "query exceeds maximum length of {} bytes",
            MAX_QUERY_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CortexError::Validation(format!("{} is required", field)));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CortexError::Validation(format!(
            "{} exceeds {} characters",
            field, MAX_IDENTIFIER_LENGTH
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CortexError::Validation(format!(
            "{} must not contain whitespace or control characters",
            field
        )));
    }
    Ok(())
}
