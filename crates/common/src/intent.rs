//! Query intent types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CortexError;

/// The execution path a query is routed to.
///
/// The set is closed: anything a classifier emits outside these five values is
/// rejected while parsing, never at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    /// Plain conversational reply
    Conversation,
    /// One or more tools must run
    ToolExecution,
    /// Answer from stored conversational memory
    MemoryChat,
    /// Tools plus memory in a single generation
    Hybrid,
    /// Answer from semantic/knowledge memory
    KnowledgeSearch,
}

impl IntentType {
    pub const ALL: [IntentType; 5] = [
        IntentType::Conversation,
        IntentType::ToolExecution,
        IntentType::MemoryChat,
        IntentType::Hybrid,
        IntentType::KnowledgeSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Conversation => "conversation",
            IntentType::ToolExecution => "tool_execution",
            IntentType::MemoryChat => "memory_chat",
            IntentType::Hybrid => "hybrid",
            IntentType::KnowledgeSearch => "knowledge_search",
        }
    }

    /// Whether this path invokes tools.
    pub fn runs_tools(&self) -> bool {
        matches!(self, IntentType::ToolExecution | IntentType::Hybrid)
    }

    /// Whether this path answers from memory.
    pub fn reads_memory(&self) -> bool {
        matches!(
            self,
            IntentType::MemoryChat | IntentType::Hybrid | IntentType::KnowledgeSearch
        )
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        IntentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| {
                CortexError::Validation(format!(
                    "Unknown intent '{}'. Expected one of: conversation, tool_execution, memory_chat, hybrid, knowledge_search",
                    s
                ))
            })
    }
}

/// Where a [`QueryIntent`] came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Parsed from the first completion
    #[default]
    Llm,
    /// Parsed after the corrective retry
    LlmCorrected,
    /// Keyword/pattern fallback
    Heuristic,
    /// Caller-supplied `hintIntent`
    Hint,
    /// Nothing usable; defaulted to conversation
    Unparsed,
}

/// A classified execution intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,

    /// Confidence in [0, 1]
    pub confidence: f32,

    /// Ordered, duplicate-free tool names
    #[serde(default)]
    pub required_tools: Vec<String>,

    /// Whether a memory lookup is warranted
    #[serde(default)]
    pub memory_context: bool,

    #[serde(default)]
    pub reasoning: String,

    #[serde(default)]
    pub source: ClassificationSource,
}

impl QueryIntent {
    pub fn new(intent_type: IntentType, confidence: f32) -> Self {
        Self {
            intent_type,
            confidence: confidence.clamp(0.0, 1.0),
            required_tools: Vec::new(),
            memory_context: intent_type.reads_memory(),
            reasoning: String::new(),
            source: ClassificationSource::Llm,
        }
    }

    /// The outcome when no classification could be produced at all.
    pub fn unparsed() -> Self {
        Self {
            reasoning: "classification unavailable".into(),
            source: ClassificationSource::Unparsed,
            ..Self::new(IntentType::Conversation, 0.0)
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = dedup_ordered(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_memory_context(mut self, memory_context: bool) -> Self {
        self.memory_context = memory_context;
        self
    }

    pub fn with_source(mut self, source: ClassificationSource) -> Self {
        self.source = source;
        self
    }
}

/// Remove duplicates while keeping first-seen order.
pub fn dedup_ordered<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if !trimmed.is_empty() && !out.iter().any(|seen| seen == trimmed) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_type_parses_closed_set_only() {
        assert_eq!("tool_execution".parse::<IntentType>().unwrap(), IntentType::ToolExecution);
        assert_eq!(" Memory_Chat ".parse::<IntentType>().unwrap(), IntentType::MemoryChat);
        assert!("unknown".parse::<IntentType>().is_err());
        assert!("".parse::<IntentType>().is_err());
    }

    #[test]
    fn intent_serializes_with_type_key() {
        let intent = QueryIntent::new(IntentType::Hybrid, 0.8).with_tools(["calculator"]);
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["type"], "hybrid");
        assert_eq!(json["requiredTools"][0], "calculator");
        assert_eq!(json["memoryContext"], true);
    }

    #[test]
    fn unknown_type_is_rejected_by_serde() {
        let json = r#"{"type":"dance","confidence":0.5}"#;
        assert!(serde_json::from_str::<QueryIntent>(json).is_err());
    }

    #[test]
    fn required_tools_are_deduplicated_in_order() {
        let intent = QueryIntent::new(IntentType::ToolExecution, 0.9)
            .with_tools(["b", "a", "b", " ", "a", "c"]);
        assert_eq!(intent.required_tools, vec!["b", "a", "c"]);
    }

    #[test]
    fn confidence_is_clamped_on_construction() {
        assert_eq!(QueryIntent::new(IntentType::Conversation, 1.7).confidence, 1.0);
        assert_eq!(QueryIntent::new(IntentType::Conversation, -0.2).confidence, 0.0);
    }

    #[test]
    fn unparsed_is_zero_confidence_conversation() {
        let intent = QueryIntent::unparsed();
        assert_eq!(intent.intent_type, IntentType::Conversation);
        assert_eq!(intent.confidence, 0.0);
        assert_eq!(intent.source, ClassificationSource::Unparsed);
    }
}
