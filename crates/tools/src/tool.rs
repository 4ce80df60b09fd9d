//! The callable every registry entry implements.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolResult;

/// A named, schema-validated callable.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the `args` object accepted by [`Tool::invoke`].
    fn input_schema(&self) -> Value;

    /// Overrides the caller's timeout when set.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Derive arguments directly from the user's query text, if the tool
    /// knows how. Used when no arguments were supplied or extracted.
    fn args_from_query(&self, _query: &str) -> Option<Value> {
        None
    }

    async fn invoke(&self, args: Value) -> ToolResult<Value>;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// What `list()` reports about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// JSON Schema for a `schemars`-derived input type.
pub fn schema_for<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}
