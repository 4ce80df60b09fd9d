//! LLM-backed intent classification.
//!
//! The model is asked for a bare JSON object and its reply is parsed strictly
//! against the [`QueryIntent`] shape: the intent must be one of the five known
//! variants and the confidence must lie in [0, 1]. An unusable reply earns one
//! corrective retry; after that the keyword heuristic takes over.

use std::sync::Arc;
use std::time::Duration;

use cortex_common::{
    ClassificationSource, ClassifyHints, CortexError, IntentType, QueryIntent, Result,
};
use cortex_llm::{ChatMessage, LlmClient, LlmRequest};
use cortex_tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ClassifierConfig;
use crate::heuristic;

const MAX_REASONING_LENGTH: usize = 500;
const MAX_PREVIOUS_INTENTS: usize = 5;

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"You are the intent classifier for an agent runtime. Decide how the user's query should be executed.

## Intents
- "conversation": greetings, chit-chat, opinions, anything answerable directly
- "tool_execution": the query needs one or more tools to run (calculations, fetching a URL, reading a file)
- "memory_chat": the query asks about the user's own past conversations, preferences or personal facts
- "hybrid": the query needs tools AND the user's stored memory in one answer
- "knowledge_search": the query asks about a concept or fact that may be in the user's knowledge base

## Output format
Respond with ONLY a JSON object, no markdown, no explanation:
{"type":"<intent>","confidence":<0.0-1.0>,"requiredTools":["<tool>"],"memoryContext":<true|false>,"reasoning":"<one sentence>"}

Only list tools from the available tools section. Use an empty list when no tool is needed."#;

const CORRECTIVE_PROMPT: &str = r#"Your previous reply could not be used. Reply again with ONLY a JSON object with exactly these keys:
"type" (one of "conversation", "tool_execution", "memory_chat", "hybrid", "knowledge_search"),
"confidence" (a number between 0 and 1),
"requiredTools" (an array of tool names, possibly empty),
"memoryContext" (true or false),
"reasoning" (a short string)."#;

/// Classifies queries into one of the five execution intents.
#[derive(Clone)]
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    config: ClassifierConfig,
}

impl IntentClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one query.
    ///
    /// Fails only on malformed input; model failures are recovered.
    pub async fn classify(&self, query: &str, hints: &ClassifyHints) -> Result<QueryIntent> {
        cortex_common::request::validate_query(query)?;
        hints.validate()?;
        Ok(self.classify_validated(query, hints).await)
    }

    /// Classify a query whose inputs have already been validated.
    #[instrument(skip_all, fields(query_len = query.len()))]
    pub(crate) async fn classify_validated(&self, query: &str, hints: &ClassifyHints) -> QueryIntent {
        let prompt = self.build_prompt(query, hints);
        let request = LlmRequest::prompt(&prompt)
            .with_system(self.system_prompt())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_model(hints.model.clone())
            .json();

        let reply = match self.complete(request.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Classification completion failed");
                return self.fallback(query);
            }
        };

        match parse_intent(&reply) {
            Ok(intent) => {
                debug!(intent = %intent.intent_type, confidence = intent.confidence, "Classified");
                return intent;
            }
            Err(reason) => {
                warn!(reason = %reason, "Unusable classification, retrying with corrective prompt");
            }
        }

        let mut corrective = request;
        corrective.messages.push(ChatMessage::assistant(reply));
        corrective.messages.push(ChatMessage::user(CORRECTIVE_PROMPT));

        let parsed = self
            .complete(corrective)
            .await
            .map_err(|e| e.to_string())
            .and_then(|reply| parse_intent(&reply));

        match parsed {
            Ok(intent) => {
                debug!(intent = %intent.intent_type, "Classified after corrective retry");
                intent.with_source(ClassificationSource::LlmCorrected)
            }
            Err(reason) => {
                warn!(reason = %reason, "Corrective retry failed");
                self.fallback(query)
            }
        }
    }

    /// Classify many queries with at most `concurrency` in flight.
    ///
    /// A failing entry never aborts the batch; its slot records the error.
    pub async fn classify_batch(
        &self,
        entries: Vec<BatchEntry>,
        concurrency: Option<usize>,
    ) -> BatchSummary {
        let concurrency = concurrency.unwrap_or(self.config.batch_concurrency).max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        info!(
            total = entries.len(),
            concurrency, "Starting batch classification"
        );

        let mut handles = Vec::with_capacity(entries.len());
        for entry in entries {
            let classifier = self.clone();
            let semaphore = semaphore.clone();
            let query = entry.query.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| CortexError::Classification(e.to_string()))?;
                classifier.classify(&entry.query, &entry.hints).await
            });
            handles.push((query, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, (query, handle)) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(index, error = %e, "Classification task join error");
                    Err(CortexError::Classification(format!("task join error: {e}")))
                }
            };
            results.push(match outcome {
                Ok(intent) => BatchItem {
                    index,
                    query,
                    success: true,
                    intent: Some(intent),
                    error: None,
                },
                Err(e) => BatchItem {
                    index,
                    query,
                    success: false,
                    intent: None,
                    error: Some(e.to_string()),
                },
            });
        }

        let summary = BatchSummary::from_items(results);
        info!(
            total = summary.total_queries,
            failed = summary.failed_classifications,
            average_confidence = summary.average_confidence,
            "Batch classification completed"
        );
        summary
    }

    fn fallback(&self, query: &str) -> QueryIntent {
        if self.config.heuristic_fallback {
            heuristic::classify(query)
        } else {
            QueryIntent::unparsed()
        }
    }

    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let limit = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(limit, self.llm.complete(request)).await {
            Ok(response) => response.map(|r| r.content),
            Err(_) => Err(CortexError::Timeout(self.config.timeout_ms)),
        }
    }

    fn system_prompt(&self) -> String {
        let tools = self.registry.list();
        if tools.is_empty() {
            return format!("{CLASSIFIER_SYSTEM_PROMPT}\n\n## Available tools\n(none)");
        }
        let listing = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{CLASSIFIER_SYSTEM_PROMPT}\n\n## Available tools\n{listing}")
    }

    fn build_prompt(&self, query: &str, hints: &ClassifyHints) -> String {
        let mut prompt = String::new();

        if !hints.previous_intents.is_empty() {
            prompt.push_str("Previous intents in this conversation (oldest first):\n");
            let skip = hints
                .previous_intents
                .len()
                .saturating_sub(MAX_PREVIOUS_INTENTS);
            for intent in hints.previous_intents.iter().skip(skip) {
                prompt.push_str(&format!(
                    "- {} ({:.2})\n",
                    intent.intent_type, intent.confidence
                ));
            }
            prompt.push('\n');
        }

        if let Some(context) = &hints.user_context {
            prompt.push_str(&format!("User context: {context}\n\n"));
        }

        prompt.push_str("Query: ");
        prompt.push_str(query);
        prompt
    }
}

/// The fields a classification reply must carry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIntent {
    #[serde(rename = "type", alias = "intent")]
    intent_type: String,
    confidence: f64,
    #[serde(default, alias = "required_tools", alias = "tools")]
    required_tools: Vec<String>,
    #[serde(default, alias = "memory_context")]
    memory_context: Option<bool>,
    #[serde(default)]
    reasoning: String,
}

/// Parse a classification reply into a [`QueryIntent`].
pub fn parse_intent(reply: &str) -> std::result::Result<QueryIntent, String> {
    let json = extract_json_object(reply).ok_or("no JSON object in reply")?;
    let raw: RawIntent =
        serde_json::from_str(json).map_err(|e| format!("invalid intent JSON: {e}"))?;

    let intent_type: IntentType = raw.intent_type.parse().map_err(|e: CortexError| e.to_string())?;

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(format!("confidence {} outside [0, 1]", raw.confidence));
    }

    let reasoning: String = raw.reasoning.chars().take(MAX_REASONING_LENGTH).collect();

    Ok(QueryIntent::new(intent_type, raw.confidence as f32)
        .with_tools(raw.required_tools)
        .with_memory_context(raw.memory_context.unwrap_or(intent_type.reads_memory()))
        .with_reasoning(reasoning)
        .with_source(ClassificationSource::Llm))
}

/// Extract the first balanced JSON object from a string that may contain
/// other text. Braces inside string literals are ignored.
pub(crate) fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// One query in a batch, with its own hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub query: String,
    #[serde(default)]
    pub hints: ClassifyHints,
}

impl BatchEntry {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hints: ClassifyHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: ClassifyHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Outcome of one batch slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    pub query: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<QueryIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_queries: usize,
    pub successful_classifications: usize,
    pub failed_classifications: usize,
    /// Mean confidence over the successful slots only
    pub average_confidence: f32,
    pub results: Vec<BatchItem>,
}

impl BatchSummary {
    pub fn from_items(results: Vec<BatchItem>) -> Self {
        let confidences: Vec<f32> = results
            .iter()
            .filter_map(|r| r.intent.as_ref().map(|i| i.confidence))
            .collect();
        let average_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };
        Self {
            total_queries: results.len(),
            successful_classifications: confidences.len(),
            failed_classifications: results.len() - confidences.len(),
            average_confidence,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLlm;
    use serde_json::json;

    fn classifier(llm: ScriptedLlm) -> IntentClassifier {
        IntentClassifier::new(
            Arc::new(llm),
            Arc::new(ToolRegistry::new()),
            ClassifierConfig::default(),
        )
    }

    #[test]
    fn extract_json_object_with_text() {
        let input = r#"Sure! {"type":"conversation","confidence":0.9} Done."#;
        assert_eq!(
            extract_json_object(input),
            Some(r#"{"type":"conversation","confidence":0.9}"#)
        );
    }

    #[test]
    fn extract_json_object_ignores_braces_in_strings() {
        let input = r#"{"reasoning":"uses } and {","type":"hybrid"}"#;
        assert_eq!(extract_json_object(input), Some(input));
    }

    #[test]
    fn extract_json_object_incomplete() {
        assert_eq!(extract_json_object(r#"{"type":"conversation""#), None);
        assert_eq!(extract_json_object("no json"), None);
    }

    #[test]
    fn parse_accepts_camel_and_snake_case() {
        let intent = parse_intent(
            r#"{"type":"tool_execution","confidence":0.92,"requiredTools":["calculator","calculator"],"reasoning":"math"}"#,
        )
        .unwrap();
        assert_eq!(intent.intent_type, IntentType::ToolExecution);
        assert_eq!(intent.required_tools, vec!["calculator"]);
        assert!(!intent.memory_context);

        let intent = parse_intent(
            r#"{"type":"memory_chat","confidence":0.7,"required_tools":[],"memory_context":true}"#,
        )
        .unwrap();
        assert_eq!(intent.intent_type, IntentType::MemoryChat);
        assert!(intent.memory_context);
    }

    #[test]
    fn parse_rejects_structural_problems() {
        assert!(parse_intent(r#"{"type":"telepathy","confidence":0.9}"#).is_err());
        assert!(parse_intent(r#"{"type":"conversation","confidence":1.5}"#).is_err());
        assert!(parse_intent(r#"{"type":"conversation"}"#).is_err());
        assert!(parse_intent(r#"{"confidence":0.5}"#).is_err());
        assert!(parse_intent("I think this is a conversation").is_err());
    }

    #[test]
    fn parse_truncates_long_reasoning() {
        let reply = json!({
            "type": "conversation",
            "confidence": 0.5,
            "reasoning": "x".repeat(2000),
        })
        .to_string();
        let intent = parse_intent(&reply).unwrap();
        assert_eq!(intent.reasoning.len(), MAX_REASONING_LENGTH);
    }

    #[tokio::test]
    async fn well_formed_reply_is_used_directly() {
        let llm = ScriptedLlm::replying(
            r#"{"type":"conversation","confidence":0.95,"requiredTools":[],"memoryContext":false,"reasoning":"greeting"}"#,
        );
        let calls = llm.calls();
        let intent = classifier(llm)
            .classify("Hello!", &ClassifyHints::default())
            .await
            .unwrap();
        assert_eq!(intent.intent_type, IntentType::Conversation);
        assert_eq!(intent.source, ClassificationSource::Llm);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(calls.lock().unwrap()[0].json_mode);
    }

    #[tokio::test]
    async fn corrective_retry_recovers_bad_reply() {
        let llm = ScriptedLlm::sequence(vec![
            Ok("It's a greeting.".into()),
            Ok(r#"{"type":"conversation","confidence":0.8}"#.into()),
        ]);
        let calls = llm.calls();
        let intent = classifier(llm)
            .classify("Hello!", &ClassifyHints::default())
            .await
            .unwrap();
        assert_eq!(intent.source, ClassificationSource::LlmCorrected);
        assert_eq!(intent.confidence, 0.8);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].messages.len(), 3);
        assert_eq!(calls[1].last_user_message(), Some(CORRECTIVE_PROMPT));
    }

    #[tokio::test]
    async fn two_bad_replies_fall_back_to_heuristic() {
        let llm = ScriptedLlm::sequence(vec![
            Ok(r#"{"type":"math","confidence":0.9}"#.into()),
            Ok(r#"{"type":"tool_execution","confidence":7}"#.into()),
        ]);
        let intent = classifier(llm)
            .classify("What is 15 + 27?", &ClassifyHints::default())
            .await
            .unwrap();
        assert_eq!(intent.source, ClassificationSource::Heuristic);
        assert_eq!(intent.intent_type, IntentType::ToolExecution);
        assert_eq!(intent.required_tools, vec!["calculator"]);
        assert_eq!(intent.confidence, 0.3);
    }

    #[tokio::test]
    async fn unreachable_model_skips_corrective_retry() {
        let llm = ScriptedLlm::failing();
        let calls = llm.calls();
        let intent = classifier(llm)
            .classify("Explain lifetimes", &ClassifyHints::default())
            .await
            .unwrap();
        assert_eq!(intent.intent_type, IntentType::KnowledgeSearch);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_heuristic_yields_unparsed() {
        let config = ClassifierConfig {
            heuristic_fallback: false,
            ..Default::default()
        };
        let classifier = IntentClassifier::new(
            Arc::new(ScriptedLlm::replying("nope")),
            Arc::new(ToolRegistry::new()),
            config,
        );
        let intent = classifier
            .classify("What is 15 + 27?", &ClassifyHints::default())
            .await
            .unwrap();
        assert_eq!(intent.source, ClassificationSource::Unparsed);
        assert_eq!(intent.intent_type, IntentType::Conversation);
        assert_eq!(intent.confidence, 0.0);
    }

    #[tokio::test]
    async fn hints_and_model_reach_the_prompt() {
        let llm = ScriptedLlm::replying(r#"{"type":"memory_chat","confidence":0.6}"#);
        let calls = llm.calls();
        let hints = ClassifyHints {
            previous_intents: vec![QueryIntent::new(IntentType::ToolExecution, 0.9)],
            user_context: Some(json!({"timezone": "UTC"})),
            model: Some("small-model".into()),
        };
        classifier(llm).classify("and before that?", &hints).await.unwrap();

        let calls = calls.lock().unwrap();
        let prompt = calls[0].last_user_message().unwrap();
        assert!(prompt.contains("tool_execution (0.90)"));
        assert!(prompt.contains("timezone"));
        assert_eq!(calls[0].model.as_deref(), Some("small-model"));
    }

    #[tokio::test]
    async fn malformed_hint_is_a_validation_error() {
        let hints = ClassifyHints {
            user_context: Some(json!({"userId": "has space"})),
            ..Default::default()
        };
        let err = classifier(ScriptedLlm::replying("{}"))
            .classify("hi", &hints)
            .await
            .unwrap_err();
        assert!(matches!(err, CortexError::Validation(_)));
    }

    #[tokio::test]
    async fn batch_counts_failures_and_averages_successes() {
        let llm = ScriptedLlm::replying(r#"{"type":"conversation","confidence":0.9}"#);
        let entries = vec![
            BatchEntry::new("Hello"),
            BatchEntry::new("Hello").with_hints(ClassifyHints {
                user_context: Some(json!({"userId": ""})),
                ..Default::default()
            }),
            BatchEntry::new("   "),
        ];
        let summary = classifier(llm).classify_batch(entries, Some(2)).await;

        assert_eq!(summary.total_queries, 3);
        assert_eq!(summary.successful_classifications, 1);
        assert_eq!(summary.failed_classifications, 2);
        assert!((summary.average_confidence - 0.9).abs() < 1e-6);
        assert_eq!(summary.results[0].index, 0);
        assert!(summary.results[0].success);
        assert!(summary.results[1].error.is_some());
    }

    #[test]
    fn empty_batch_has_zero_average() {
        let summary = BatchSummary::from_items(Vec::new());
        assert_eq!(summary.total_queries, 0);
        assert_eq!(summary.average_confidence, 0.0);
    }
}
