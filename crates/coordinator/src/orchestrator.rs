//! The orchestration core: classify, assemble memory, route, compose.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_common::{
    ClassificationSource, ClassifyHints, CortexError, ExecuteOptions, ExecutionResult, IntentType,
    MemoryContext, QueryIntent, Result, StageTimings, ToolRunRecord,
};
use cortex_llm::{build_llm_client, LlmClient};
use cortex_memory::{
    build_embedder, BuildOptions, ContextAssembler, Embedder, EpisodicStore, SemanticStore,
};
use cortex_tools::{register_builtins, ToolMetadata, ToolRegistry};
use tracing::{debug, info, instrument, warn};

use crate::classifier::{BatchEntry, BatchSummary, IntentClassifier};
use crate::composer::{compose, Composition};
use crate::config::CoordinatorConfig;
use crate::router::{tool_summary, ExecutionRouter};
use crate::tool_runner::dependency_order;

/// Entry point for `execute`, `classify` and `classify_batch`.
///
/// Every collaborator is passed in at construction; the orchestrator itself
/// holds no per-request state.
pub struct Orchestrator {
    classifier: IntentClassifier,
    assembler: Arc<ContextAssembler>,
    router: ExecutionRouter,
    registry: Arc<ToolRegistry>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        assembler: Arc<ContextAssembler>,
        registry: Arc<ToolRegistry>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(
                llm.clone(),
                registry.clone(),
                config.classifier.clone(),
            ),
            router: ExecutionRouter::new(llm, registry.clone(), config.router.clone()),
            assembler,
            registry,
        }
    }

    /// Wire the configured provider, embedder and built-in tools around the
    /// given stores.
    pub fn from_config(
        config: &CoordinatorConfig,
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
    ) -> Result<Self> {
        let embedder = build_embedder(&config.embedding)?;
        Self::from_config_with_embedder(config, episodic, semantic, embedder)
    }

    /// Like [`Orchestrator::from_config`], reusing an embedder the caller
    /// already built.
    pub fn from_config_with_embedder(
        config: &CoordinatorConfig,
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let llm = build_llm_client(&config.llm)?;
        let assembler = Arc::new(ContextAssembler::new(
            episodic,
            semantic,
            embedder,
            config.memory.clone(),
        ));

        let registry = Arc::new(
            ToolRegistry::new()
                .with_default_timeout(Duration::from_millis(config.router.tool_timeout_ms)),
        );
        register_builtins(&registry, &config.tools)?;

        info!(
            model = %llm.model_name(),
            tools = registry.len(),
            "Orchestrator ready"
        );
        Ok(Self::new(llm, assembler, registry, config))
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn tools(&self) -> Vec<ToolMetadata> {
        self.registry.list()
    }

    /// Classify one query without executing it.
    pub async fn classify(&self, query: &str, hints: &ClassifyHints) -> Result<QueryIntent> {
        self.classifier.classify(query, hints).await
    }

    /// Classify many queries; `concurrency` defaults to the configured cap.
    pub async fn classify_batch(
        &self,
        entries: Vec<BatchEntry>,
        concurrency: Option<usize>,
    ) -> BatchSummary {
        self.classifier.classify_batch(entries, concurrency).await
    }

    /// Run one query through the whole pipeline.
    ///
    /// Returns `Err` only for malformed input. Every other failure is carried
    /// on the returned result.
    #[instrument(skip_all, fields(user_id = %options.user_id, session_id = %options.session_id))]
    pub async fn execute(&self, query: &str, options: &ExecuteOptions) -> Result<ExecutionResult> {
        let started = Instant::now();
        let hint = options.validate(query)?;
        let hints = ClassifyHints {
            previous_intents: options.previous_intents.clone(),
            user_context: options.user_context.clone(),
            model: options.model.clone(),
        };
        hints.validate()?;

        let deadline = options
            .deadline_ms
            .map(|ms| started + Duration::from_millis(ms));

        info!(
            query_len = query.len(),
            include_memory = options.include_memory_context,
            hinted = hint.is_some(),
            "Executing query"
        );

        let classification = async {
            let stage = Instant::now();
            let intent = match hint {
                Some(intent_type) => hinted_intent(intent_type, options),
                None => self.classifier.classify_validated(query, &hints).await,
            };
            (intent, elapsed_ms(stage))
        };

        let memory = async {
            if !options.include_memory_context {
                return (None, 0);
            }
            let stage = Instant::now();
            let mut build = BuildOptions::default().with_max_results(options.max_memory_results);
            if let Some(id) = &options.pinned_record_id {
                build = build.pinned(id.clone());
            }
            let context = self
                .assembler
                .build_context(&options.user_id, &options.session_id, query, &build)
                .await;
            (Some(context), elapsed_ms(stage))
        };

        let ((intent, classification_time), (context, memory_search_time)) =
            tokio::join!(classification, memory);

        debug!(
            intent = %intent.intent_type,
            confidence = intent.confidence,
            source = ?intent.source,
            memories = context.as_ref().map_or(0, MemoryContext::len),
            "Classification and memory stage completed"
        );

        let mut timings = StageTimings {
            classification_time,
            memory_search_time,
            ..Default::default()
        };

        if past(deadline) {
            return Ok(self.deadline_result(query, intent, context, Vec::new(), timings, started, options));
        }

        let tools = self.router.run_tools(query, &intent, options).await;
        timings.tool_execution_time = tools.elapsed_ms;

        if past(deadline) {
            return Ok(self.deadline_result(query, intent, context, tools.records, timings, started, options));
        }

        let answer = self
            .router
            .answer(query, &intent, context.as_ref(), &tools, options)
            .await;
        timings.llm_response_time = answer.elapsed_ms;

        let mut notes = Vec::new();
        if answer.from_tool_summary {
            notes.push("Answer generation failed; returning tool results directly.".to_string());
        }
        if context.as_ref().is_some_and(MemoryContext::is_degraded) {
            notes.push("Some memory sources were unavailable.".to_string());
        }

        let result = compose(
            query,
            Composition {
                intent,
                context,
                tool_results: tools.records,
                completion: answer.text,
                timings,
                execution_time: elapsed_ms(started),
                deadline_exceeded: false,
                notes,
            },
            options.include_reasoning,
            options.detail,
        );

        info!(
            success = result.success,
            intent = %result.intent.intent_type,
            tools_executed = result.metadata.tools_executed,
            memory_retrieved = result.metadata.memory_retrieved,
            execution_time = result.metadata.execution_time,
            "Query executed"
        );
        Ok(result)
    }

    /// The best result available when the caller's deadline has passed.
    #[allow(clippy::too_many_arguments)]
    fn deadline_result(
        &self,
        query: &str,
        intent: QueryIntent,
        context: Option<MemoryContext>,
        tool_results: Vec<ToolRunRecord>,
        timings: StageTimings,
        started: Instant,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let budget = options.deadline_ms.unwrap_or_default();
        warn!(deadline_ms = budget, "Deadline exceeded, returning partial result");

        let usable_tools = intent.intent_type == IntentType::ToolExecution
            && tool_results.iter().any(|r| r.success);
        let completion = if usable_tools {
            Ok(tool_summary(&tool_results))
        } else {
            Err(CortexError::Timeout(budget))
        };

        compose(
            query,
            Composition {
                intent,
                context,
                tool_results,
                completion,
                timings,
                execution_time: elapsed_ms(started),
                deadline_exceeded: true,
                notes: vec![format!("Deadline of {budget} ms exceeded.")],
            },
            options.include_reasoning,
            options.detail,
        )
    }
}

/// The intent used when the caller names one.
///
/// For tool paths the caller's `tool_args` name the tools, ordered so that
/// every tool follows its declared inputs.
fn hinted_intent(intent_type: IntentType, options: &ExecuteOptions) -> QueryIntent {
    let tools = if intent_type.runs_tools() {
        let mut names: Vec<String> = options.tool_args.keys().cloned().collect();
        names.sort();
        dependency_order(&names, &options.tool_dependencies)
    } else {
        Vec::new()
    };

    QueryIntent::new(intent_type, 1.0)
        .with_tools(tools)
        .with_reasoning(format!("intent '{intent_type}' supplied by caller"))
        .with_source(ClassificationSource::Hint)
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
