//! Execution routing.
//!
//! Each request runs exactly one of the five execution paths, chosen by an
//! exhaustive match on the classified intent. A path has two stages: the
//! tool stage (only for `tool_execution` and `hybrid`) and the terminal
//! completion that produces the answer. Only the terminal completion can
//! fail the request.
//!
//! The terminal completion is a single call under a timeout. Transient
//! provider failures are retried by the client stack (`RetryingClient`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_common::{CortexError, ExecuteOptions, IntentType, MemoryContext, QueryIntent, Result, ToolRunRecord};
use cortex_llm::{LlmClient, LlmRequest};
use cortex_memory::{render_background, MemoryFocus};
use cortex_tools::ToolRegistry;
use tracing::{debug, info, instrument, warn};

use crate::config::RouterConfig;
use crate::tool_runner::{ToolPlan, ToolRunner};

const MAX_TOOL_OUTPUT_CHARS: usize = 4_000;

const ASSISTANT_PROMPT: &str = "You are Cortex, a helpful assistant. Answer clearly and concisely.";

const MEMORY_ONLY_INSTRUCTIONS: &str = "Answer the user's question using ONLY the memory context below. \
If the answer is not in the memory context, say that you do not know rather than guessing.";

const KNOWLEDGE_INSTRUCTIONS: &str = "Answer the user's question from the known facts below. \
Conversation history is secondary and should only fill gaps. \
If the facts do not cover the question, say so before answering from general knowledge.";

const TOOL_INSTRUCTIONS: &str = "Tools were run for this request. Base your answer on their results. \
If a tool failed or was skipped, say what could not be done.";

const HYBRID_INSTRUCTIONS: &str = "Tools were run for this request and the user's memory was retrieved. \
Combine the tool results with the memory context in a single answer.";

const RESTATE_INSTRUCTIONS: &str = "No tool could be identified for this request. \
Restate what the user needs and which capability or information would be required to fulfil it, \
then help as far as you can without it.";

/// Outcome of the tool stage.
#[derive(Debug, Clone, Default)]
pub struct ToolStage {
    pub records: Vec<ToolRunRecord>,
    pub elapsed_ms: u64,
}

impl ToolStage {
    pub fn any_succeeded(&self) -> bool {
        self.records.iter().any(|r| r.success)
    }
}

/// Outcome of the terminal completion.
#[derive(Debug)]
pub struct Answer {
    pub text: Result<String>,
    pub elapsed_ms: u64,
    /// The text is a tool summary standing in for a failed completion
    pub from_tool_summary: bool,
}

pub struct ExecutionRouter {
    llm: Arc<dyn LlmClient>,
    runner: ToolRunner,
    config: RouterConfig,
}

impl ExecutionRouter {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, config: RouterConfig) -> Self {
        Self {
            runner: ToolRunner::new(registry, llm.clone(), config.clone()),
            llm,
            config,
        }
    }

    pub fn runner(&self) -> &ToolRunner {
        &self.runner
    }

    /// Run the tools the intent asks for. Empty for paths without tools.
    #[instrument(skip_all, fields(intent = %intent.intent_type))]
    pub async fn run_tools(
        &self,
        query: &str,
        intent: &QueryIntent,
        options: &ExecuteOptions,
    ) -> ToolStage {
        match intent.intent_type {
            IntentType::ToolExecution | IntentType::Hybrid => {}
            IntentType::Conversation | IntentType::MemoryChat | IntentType::KnowledgeSearch => {
                return ToolStage::default();
            }
        }

        let started = Instant::now();
        let mut tools = intent.required_tools.clone();
        if tools.is_empty() {
            debug!("Intent lists no tools, asking the model to select");
            tools = self.runner.select_tools(query, options.model.clone()).await;
        }
        if tools.is_empty() {
            info!("No tools selected for tool-bearing intent");
            return ToolStage {
                records: Vec::new(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
        }

        let plan = ToolPlan {
            args: options.tool_args.clone(),
            dependencies: options.tool_dependencies.clone(),
            parallel: options.parallel_tools,
            model: options.model.clone(),
            ..ToolPlan::new(query, tools)
        };
        let records = self.runner.run(&plan).await;

        let stage = ToolStage {
            records,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            tools = stage.records.len(),
            succeeded = stage.records.iter().filter(|r| r.success).count(),
            elapsed_ms = stage.elapsed_ms,
            "Tool stage completed"
        );
        stage
    }

    /// Produce the user-facing answer.
    #[instrument(skip_all, fields(intent = %intent.intent_type))]
    pub async fn answer(
        &self,
        query: &str,
        intent: &QueryIntent,
        context: Option<&MemoryContext>,
        tools: &ToolStage,
        options: &ExecuteOptions,
    ) -> Answer {
        let started = Instant::now();
        let system = build_system_prompt(intent.intent_type, context, &tools.records);
        let request = LlmRequest::prompt(query)
            .with_system(system)
            .with_temperature(options.temperature.unwrap_or(self.config.answer_temperature))
            .with_max_tokens(self.config.answer_max_tokens)
            .with_model(options.model.clone());

        let text = match self.complete(request).await {
            Ok(text) => Ok(text),
            Err(e) if intent.intent_type == IntentType::ToolExecution && tools.any_succeeded() => {
                warn!(error = %e, "Answer completion failed, returning tool summary");
                return Answer {
                    text: Ok(tool_summary(&tools.records)),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    from_tool_summary: true,
                };
            }
            Err(e) => {
                warn!(error = %e, "Answer completion failed");
                Err(CortexError::Composition(e.to_string()))
            }
        };

        Answer {
            text,
            elapsed_ms: started.elapsed().as_millis() as u64,
            from_tool_summary: false,
        }
    }

    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let limit = Duration::from_millis(self.config.completion_timeout_ms);
        match tokio::time::timeout(limit, self.llm.complete(request)).await {
            Ok(response) => response.map(|r| r.content),
            Err(_) => Err(CortexError::Timeout(self.config.completion_timeout_ms)),
        }
    }
}

/// The system prompt for the terminal completion of each path.
fn build_system_prompt(
    intent_type: IntentType,
    context: Option<&MemoryContext>,
    tools: &[ToolRunRecord],
) -> String {
    let mut sections = vec![ASSISTANT_PROMPT.to_string()];

    match intent_type {
        IntentType::Conversation => {
            if let Some(background) = background(context, MemoryFocus::Episodic) {
                sections.push(format!("Background that may be relevant:\n\n{background}"));
            }
        }
        IntentType::ToolExecution => {
            if tools.is_empty() {
                sections.push(RESTATE_INSTRUCTIONS.to_string());
            } else {
                sections.push(TOOL_INSTRUCTIONS.to_string());
                sections.push(render_tool_results(tools));
            }
        }
        IntentType::MemoryChat => {
            sections.push(MEMORY_ONLY_INSTRUCTIONS.to_string());
            sections.push(memory_block(context, MemoryFocus::Episodic));
        }
        IntentType::Hybrid => {
            sections.push(HYBRID_INSTRUCTIONS.to_string());
            if tools.is_empty() {
                sections.push("## Tool results\n(no tool could be identified)".to_string());
            } else {
                sections.push(render_tool_results(tools));
            }
            sections.push(memory_block(context, MemoryFocus::Episodic));
        }
        IntentType::KnowledgeSearch => {
            sections.push(KNOWLEDGE_INSTRUCTIONS.to_string());
            sections.push(memory_block(context, MemoryFocus::Semantic));
        }
    }

    sections.join("\n\n")
}

fn background(context: Option<&MemoryContext>, focus: MemoryFocus) -> Option<String> {
    let rendered = render_background(context?, focus);
    (!rendered.is_empty()).then_some(rendered)
}

fn memory_block(context: Option<&MemoryContext>, focus: MemoryFocus) -> String {
    match background(context, focus) {
        Some(rendered) => format!("# Memory context\n\n{rendered}"),
        None => "# Memory context\n\n(no memories available)".to_string(),
    }
}

fn render_tool_results(records: &[ToolRunRecord]) -> String {
    let lines: Vec<String> = records
        .iter()
        .map(|record| {
            if record.success {
                let data = record
                    .data
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                format!("- {} succeeded: {}", record.tool_name, clip(&data))
            } else if record.skipped {
                format!(
                    "- {} skipped: {}",
                    record.tool_name,
                    record.error.as_deref().unwrap_or("")
                )
            } else {
                format!(
                    "- {} failed: {}",
                    record.tool_name,
                    record.error.as_deref().unwrap_or("unknown error")
                )
            }
        })
        .collect();
    format!("## Tool results\n{}", lines.join("\n"))
}

/// Deterministic answer built from successful tool outputs.
pub fn tool_summary(records: &[ToolRunRecord]) -> String {
    let lines: Vec<String> = records
        .iter()
        .filter(|r| r.success)
        .map(|r| {
            let data = r.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
            format!("- {}: {}", r.tool_name, clip(&data))
        })
        .collect();
    format!("Tool results:\n{}", lines.join("\n"))
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_TOOL_OUTPUT_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_TOOL_OUTPUT_CHARS).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{system_of, ScriptedLlm};
    use cortex_common::{EpisodicMemoryRecord, Scored, SemanticMemoryRecord};
    use cortex_tools::Calculator;
    use serde_json::json;

    fn router(llm: ScriptedLlm) -> ExecutionRouter {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Calculator).unwrap();
        ExecutionRouter::new(Arc::new(llm), registry, RouterConfig::default())
    }

    async fn run(
        router: &ExecutionRouter,
        query: &str,
        intent: &QueryIntent,
        options: &ExecuteOptions,
    ) -> (ToolStage, Answer) {
        let tools = router.run_tools(query, intent, options).await;
        let answer = router.answer(query, intent, None, &tools, options).await;
        (tools, answer)
    }

    fn context_with_memories() -> MemoryContext {
        let mut ctx = MemoryContext::empty("u1", "s1");
        ctx.episodic_memories.push(Scored::new(
            EpisodicMemoryRecord::new("u1", "s1", "I love Python"),
            0.9,
        ));
        ctx.semantic_memories.push(Scored::new(
            SemanticMemoryRecord::new("u1", "Rust", "A systems language"),
            0.8,
        ));
        ctx
    }

    #[test]
    fn every_path_builds_a_prompt() {
        let ctx = context_with_memories();
        for intent_type in IntentType::ALL {
            let prompt = build_system_prompt(intent_type, Some(&ctx), &[]);
            assert!(prompt.starts_with(ASSISTANT_PROMPT), "{intent_type}");
        }
    }

    #[test]
    fn memory_chat_is_restricted_to_context() {
        let prompt = build_system_prompt(IntentType::MemoryChat, None, &[]);
        assert!(prompt.contains("ONLY the memory context"));
        assert!(prompt.contains("(no memories available)"));
    }

    #[test]
    fn knowledge_search_leads_with_facts() {
        let ctx = context_with_memories();
        let prompt = build_system_prompt(IntentType::KnowledgeSearch, Some(&ctx), &[]);
        let facts = prompt.find("## Known facts").unwrap();
        let history = prompt.find("## Conversation history").unwrap();
        assert!(facts < history);
    }

    #[test]
    fn conversation_prepends_context_as_background() {
        let ctx = context_with_memories();
        let prompt = build_system_prompt(IntentType::Conversation, Some(&ctx), &[]);
        assert!(prompt.contains("I love Python"));

        let bare = build_system_prompt(IntentType::Conversation, None, &[]);
        assert_eq!(bare, ASSISTANT_PROMPT);
    }

    #[test]
    fn tool_results_render_each_outcome() {
        let records = vec![
            ToolRunRecord::succeeded("calculator", json!({"result": 42}), 1, 1),
            ToolRunRecord::failed("http_fetch", "timed out", 5, 2),
            ToolRunRecord::skipped("summarize", "upstream tool 'http_fetch' failed"),
        ];
        let prompt = build_system_prompt(IntentType::ToolExecution, None, &records);
        assert!(prompt.contains("- calculator succeeded: {\"result\":42}"));
        assert!(prompt.contains("- http_fetch failed: timed out"));
        assert!(prompt.contains("- summarize skipped"));
    }

    #[tokio::test]
    async fn non_tool_paths_run_no_tools() {
        let router = router(ScriptedLlm::failing());
        let intent = QueryIntent::new(IntentType::MemoryChat, 0.9).with_tools(["calculator"]);
        let stage = router
            .run_tools("x", &intent, &ExecuteOptions::new("u1", "s1"))
            .await;
        assert!(stage.records.is_empty());
    }

    #[tokio::test]
    async fn empty_tool_list_degrades_to_restating_the_need() {
        let llm = ScriptedLlm::new(|request| {
            if system_of(request).contains("select tools") {
                Ok(r#"{"tools":[]}"#.into())
            } else {
                assert!(system_of(request).contains("No tool could be identified"));
                Ok("You need a currency converter.".into())
            }
        });
        let router = router(llm);
        let intent = QueryIntent::new(IntentType::ToolExecution, 0.9);
        let (stage, answer) =
            run(&router, "convert 5 EUR", &intent, &ExecuteOptions::new("u1", "s1")).await;
        assert!(stage.records.is_empty());
        assert_eq!(answer.text.unwrap(), "You need a currency converter.");
    }

    #[tokio::test]
    async fn failed_completion_with_tool_success_returns_summary() {
        let router = router(ScriptedLlm::failing());
        let intent = QueryIntent::new(IntentType::ToolExecution, 0.9).with_tools(["calculator"]);
        let options = ExecuteOptions::new("u1", "s1")
            .with_tool_args("calculator", json!({"expression": "2 + 2"}));
        let (_, answer) = run(&router, "2 + 2", &intent, &options).await;
        assert!(answer.from_tool_summary);
        assert!(answer.text.unwrap().contains("\"result\":4"));
    }

    #[tokio::test]
    async fn failed_completion_without_tools_is_a_composition_error() {
        let llm = ScriptedLlm::failing();
        let calls = llm.calls();
        let router = router(llm);
        let intent = QueryIntent::new(IntentType::Conversation, 0.9);
        let (_, answer) = run(&router, "Hello", &intent, &ExecuteOptions::new("u1", "s1")).await;
        assert!(matches!(answer.text, Err(CortexError::Composition(_))));
        // Retries belong to the client stack; the router calls once.
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn answer_uses_request_overrides() {
        let llm = ScriptedLlm::replying("hi");
        let calls = llm.calls();
        let router = router(llm);
        let mut options = ExecuteOptions::new("u1", "s1");
        options.model = Some("big-model".into());
        options.temperature = Some(0.2);
        let intent = QueryIntent::new(IntentType::Conversation, 0.9);
        run(&router, "Hello", &intent, &options).await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].model.as_deref(), Some("big-model"));
        assert_eq!(calls[0].temperature, Some(0.2));
        assert!(!calls[0].json_mode);
    }
}
