//! Tool execution for the `tool_execution` and `hybrid` paths.
//!
//! Tools run in the listed order by default. In parallel mode the declared
//! dependencies are layered and each layer runs concurrently. A failing tool
//! never aborts its siblings, but every tool that declared it as an input is
//! skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_common::{dedup_ordered, CortexError, Result, ToolRunRecord};
use cortex_llm::{LlmClient, LlmRequest};
use cortex_tools::{schema, Tool, ToolError, ToolRegistry};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::classifier::extract_json_object;
use crate::config::RouterConfig;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const MAX_UPSTREAM_CHARS: usize = 2_000;

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract tool arguments from a user request. \
Respond with ONLY a JSON object that matches the tool's input schema. No markdown, no explanation.";

const SELECTION_SYSTEM_PROMPT: &str = "You select tools for an agent runtime. \
Given a user request and the available tools, respond with ONLY a JSON object of the form \
{\"tools\":[\"<tool name>\"]}, listing the tools to run in order. Use an empty list if none apply.";

/// Everything needed to run the tools for one request.
#[derive(Debug, Clone, Default)]
pub struct ToolPlan {
    pub query: String,
    /// Ordered, duplicate-free
    pub tools: Vec<String>,
    /// Arguments supplied by the caller, keyed by tool name
    pub args: HashMap<String, Value>,
    /// Tool name -> tools whose output it consumes
    pub dependencies: HashMap<String, Vec<String>>,
    pub parallel: bool,
    pub model: Option<String>,
}

impl ToolPlan {
    pub fn new(query: impl Into<String>, tools: Vec<String>) -> Self {
        Self {
            query: query.into(),
            tools: dedup_ordered(tools),
            ..Default::default()
        }
    }

    fn upstream(&self, tool: &str) -> &[String] {
        self.dependencies.get(tool).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Clone)]
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    config: RouterConfig,
}

impl ToolRunner {
    pub fn new(registry: Arc<ToolRegistry>, llm: Arc<dyn LlmClient>, config: RouterConfig) -> Self {
        Self {
            registry,
            llm,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run every tool in the plan. Records come back in plan order.
    pub async fn run(&self, plan: &ToolPlan) -> Vec<ToolRunRecord> {
        info!(
            tools = ?plan.tools,
            parallel = plan.parallel,
            "Running tools"
        );
        if plan.parallel {
            self.run_layered(plan).await
        } else {
            self.run_sequential(plan).await
        }
    }

    async fn run_sequential(&self, plan: &ToolPlan) -> Vec<ToolRunRecord> {
        let mut finished: HashMap<String, ToolRunRecord> = HashMap::new();
        let mut records = Vec::with_capacity(plan.tools.len());

        for name in &plan.tools {
            let record = match upstream_outputs(plan.upstream(name), &finished) {
                Ok(upstream) => {
                    self.run_one(
                        name,
                        &plan.query,
                        plan.args.get(name).cloned(),
                        upstream,
                        plan.model.clone(),
                    )
                    .await
                }
                Err(reason) => {
                    debug!(tool = %name, reason = %reason, "Skipping tool");
                    ToolRunRecord::skipped(name, reason)
                }
            };
            finished.insert(name.clone(), record.clone());
            records.push(record);
        }
        records
    }

    async fn run_layered(&self, plan: &ToolPlan) -> Vec<ToolRunRecord> {
        let (layers, cyclic) = dependency_layers(&plan.tools, &plan.dependencies);
        let mut slots: Vec<Option<ToolRunRecord>> = vec![None; plan.tools.len()];
        let mut finished: HashMap<String, ToolRunRecord> = HashMap::new();

        for layer in layers {
            let mut handles = Vec::new();
            for index in layer {
                let name = plan.tools[index].clone();
                match upstream_outputs(plan.upstream(&name), &finished) {
                    Ok(upstream) => {
                        let runner = self.clone();
                        let query = plan.query.clone();
                        let supplied = plan.args.get(&name).cloned();
                        let model = plan.model.clone();
                        let task_name = name.clone();
                        let handle = tokio::spawn(async move {
                            runner
                                .run_one(&task_name, &query, supplied, upstream, model)
                                .await
                        });
                        handles.push((index, name, handle));
                    }
                    Err(reason) => {
                        debug!(tool = %name, reason = %reason, "Skipping tool");
                        slots[index] = Some(ToolRunRecord::skipped(&name, reason));
                    }
                }
            }

            for (index, name, handle) in handles {
                let record = match handle.await {
                    Ok(record) => record,
                    Err(e) => {
                        error!(tool = %name, error = %e, "Tool task join error");
                        ToolRunRecord::failed(&name, format!("task join error: {e}"), 0, 0)
                    }
                };
                slots[index] = Some(record);
            }

            for record in slots.iter().flatten() {
                finished
                    .entry(record.tool_name.clone())
                    .or_insert_with(|| record.clone());
            }
        }

        for index in cyclic {
            let name = &plan.tools[index];
            warn!(tool = %name, "Tool is part of a dependency cycle");
            slots[index] = Some(ToolRunRecord::skipped(name, "dependency cycle"));
        }

        slots
            .into_iter()
            .zip(&plan.tools)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| ToolRunRecord::skipped(name, "not scheduled"))
            })
            .collect()
    }

    /// Resolve arguments and invoke one tool with bounded retries.
    async fn run_one(
        &self,
        name: &str,
        query: &str,
        supplied: Option<Value>,
        upstream: Vec<(String, Value)>,
        model: Option<String>,
    ) -> ToolRunRecord {
        let started = Instant::now();

        let Some(tool) = self.registry.get(name) else {
            let err = ToolError::NotFound {
                name: name.to_string(),
            };
            warn!(tool = %name, "Requested tool is not registered");
            return ToolRunRecord::failed(name, err.to_string(), 0, 0);
        };

        let args = match supplied {
            Some(args) => args,
            None => match self.resolve_args(tool.as_ref(), query, &upstream, model).await {
                Some(args) => args,
                None => {
                    return ToolRunRecord::failed(
                        name,
                        "could not determine arguments from the request",
                        elapsed_ms(started),
                        0,
                    );
                }
            },
        };

        let limit = Duration::from_millis(self.config.tool_timeout_ms);
        let max_attempts = self.config.tool_max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.registry.invoke_with_timeout(name, args.clone(), limit).await {
                Ok(data) => {
                    return ToolRunRecord::succeeded(name, data, elapsed_ms(started), attempt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(tool = %name, attempt, error = %e, "Retrying tool");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    return ToolRunRecord::failed(name, e.to_string(), elapsed_ms(started), attempt);
                }
            }
        }
    }

    /// Extraction completion first, then the tool's own query parser.
    async fn resolve_args(
        &self,
        tool: &dyn Tool,
        query: &str,
        upstream: &[(String, Value)],
        model: Option<String>,
    ) -> Option<Value> {
        match self.extract_args(tool, query, upstream, model).await {
            Ok(args) => return Some(args),
            Err(e) => {
                debug!(tool = %tool.name(), error = %e, "Argument extraction failed, trying query parser");
            }
        }
        tool.args_from_query(query)
    }

    async fn extract_args(
        &self,
        tool: &dyn Tool,
        query: &str,
        upstream: &[(String, Value)],
        model: Option<String>,
    ) -> Result<Value> {
        let schema = tool.input_schema();
        let mut prompt = format!(
            "Tool: {}\nDescription: {}\nInput schema: {}\n",
            tool.name(),
            tool.description(),
            schema
        );
        if !upstream.is_empty() {
            prompt.push_str("Results from earlier tools:\n");
            for (name, output) in upstream {
                let rendered: String = output.to_string().chars().take(MAX_UPSTREAM_CHARS).collect();
                prompt.push_str(&format!("- {name}: {rendered}\n"));
            }
        }
        prompt.push_str(&format!("Request: {query}"));

        let request = LlmRequest::prompt(prompt)
            .with_system(EXTRACTION_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .with_max_tokens(300)
            .with_model(model)
            .json();

        let reply = self.complete(request).await?;
        let json = extract_json_object(&reply)
            .ok_or_else(|| CortexError::ToolExecution("no JSON object in extraction reply".into()))?;
        let args: Value = serde_json::from_str(json)?;
        schema::validate(&schema, &args).map_err(CortexError::ToolExecution)?;
        Ok(args)
    }

    /// Ask the model which registered tools fit a request.
    ///
    /// Returns only names present in the registry; an empty list when the
    /// registry is empty or the call fails.
    pub async fn select_tools(&self, query: &str, model: Option<String>) -> Vec<String> {
        let available = self.registry.list();
        if available.is_empty() {
            return Vec::new();
        }

        let listing = available
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let request = LlmRequest::prompt(format!("Available tools:\n{listing}\n\nRequest: {query}"))
            .with_system(SELECTION_SYSTEM_PROMPT)
            .with_temperature(0.0)
            .with_max_tokens(200)
            .with_model(model)
            .json();

        #[derive(Deserialize)]
        struct Selection {
            #[serde(default)]
            tools: Vec<String>,
        }

        let selected = match self.complete(request).await {
            Ok(reply) => extract_json_object(&reply)
                .and_then(|json| serde_json::from_str::<Selection>(json).ok())
                .map(|s| s.tools)
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Tool selection failed");
                Vec::new()
            }
        };

        let selected: Vec<String> = dedup_ordered(selected)
            .into_iter()
            .filter(|name| self.registry.contains(name))
            .collect();
        debug!(selected = ?selected, "Selected tools");
        selected
    }

    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let timeout_ms = self.config.extraction_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.llm.complete(request)).await {
            Ok(response) => response.map(|r| r.content),
            Err(_) => Err(CortexError::Timeout(timeout_ms)),
        }
    }
}

/// Outputs of a tool's declared inputs, or why it cannot run.
fn upstream_outputs(
    upstream: &[String],
    finished: &HashMap<String, ToolRunRecord>,
) -> std::result::Result<Vec<(String, Value)>, String> {
    upstream
        .iter()
        .map(|name| match finished.get(name) {
            Some(record) if record.success => Ok((
                name.clone(),
                record.data.clone().unwrap_or(Value::Null),
            )),
            Some(record) if record.skipped => Err(format!("upstream tool '{name}' was skipped")),
            Some(_) => Err(format!("upstream tool '{name}' failed")),
            None => Err(format!("upstream tool '{name}' has not run")),
        })
        .collect()
}

/// Group tool indices into layers whose inputs all come from earlier layers.
///
/// Dependencies on tools outside the list do not delay scheduling; they are
/// reported when the tool is about to run. Returns the layers and the indices
/// stuck in a cycle.
pub fn dependency_layers(
    tools: &[String],
    dependencies: &HashMap<String, Vec<String>>,
) -> (Vec<Vec<usize>>, Vec<usize>) {
    let index: HashMap<&str, usize> = tools
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let mut placed = vec![false; tools.len()];
    let mut layers = Vec::new();

    loop {
        let ready: Vec<usize> = (0..tools.len())
            .filter(|&i| !placed[i])
            .filter(|&i| {
                dependencies
                    .get(&tools[i])
                    .into_iter()
                    .flatten()
                    .all(|dep| index.get(dep.as_str()).map_or(true, |&j| placed[j]))
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for &i in &ready {
            placed[i] = true;
        }
        layers.push(ready);
    }

    let cyclic = (0..tools.len()).filter(|&i| !placed[i]).collect();
    (layers, cyclic)
}

/// Order tools so every tool comes after its inputs, keeping the given order
/// within a layer. Cyclic tools go last.
pub fn dependency_order(tools: &[String], dependencies: &HashMap<String, Vec<String>>) -> Vec<String> {
    let (layers, cyclic) = dependency_layers(tools, dependencies);
    layers
        .into_iter()
        .flatten()
        .chain(cyclic)
        .map(|i| tools[i].clone())
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{system_of, ScriptedLlm};
    use async_trait::async_trait;
    use cortex_tools::{Calculator, ToolResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "Echo the input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn invoke(&self, args: Value) -> ToolResult<Value> {
            Ok(args)
        }
    }

    struct Flaky {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "Fails on the first call"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: Value) -> ToolResult<Value> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ToolError::failed("flaky", "transient"))
            } else {
                Ok(json!("ok"))
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: Value) -> ToolResult<Value> {
            Err(ToolError::PermissionDenied {
                tool: "broken".into(),
                reason: "nope".into(),
            })
        }
    }

    fn runner(llm: ScriptedLlm, tools: Vec<Arc<dyn Tool>>) -> ToolRunner {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            registry.register_arc(tool).unwrap();
        }
        ToolRunner::new(registry, Arc::new(llm), RouterConfig::default())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn layers_follow_dependencies() {
        let tools = names(&["fetch", "summarize", "calc"]);
        let deps = HashMap::from([("summarize".to_string(), names(&["fetch"]))]);
        let (layers, cyclic) = dependency_layers(&tools, &deps);
        assert_eq!(layers, vec![vec![0, 2], vec![1]]);
        assert!(cyclic.is_empty());
    }

    #[test]
    fn cycles_are_reported() {
        let tools = names(&["a", "b", "c"]);
        let deps = HashMap::from([
            ("a".to_string(), names(&["b"])),
            ("b".to_string(), names(&["a"])),
        ]);
        let (layers, cyclic) = dependency_layers(&tools, &deps);
        assert_eq!(layers, vec![vec![2]]);
        assert_eq!(cyclic, vec![0, 1]);
        assert_eq!(dependency_order(&tools, &deps), names(&["c", "a", "b"]));
    }

    #[tokio::test]
    async fn supplied_args_skip_extraction() {
        let llm = ScriptedLlm::failing();
        let calls = llm.calls();
        let runner = runner(llm, vec![Arc::new(Echo("echo"))]);
        let mut plan = ToolPlan::new("say hi", names(&["echo"]));
        plan.args.insert("echo".into(), json!({"text": "hi"}));

        let records = runner.run(&plan).await;
        assert!(records[0].success);
        assert_eq!(records[0].data, Some(json!({"text": "hi"})));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_falls_back_to_query_parser() {
        let runner = runner(ScriptedLlm::replying("no idea"), vec![Arc::new(Calculator)]);
        let records = runner
            .run(&ToolPlan::new("What is 15 + 27?", names(&["calculator"])))
            .await;
        assert!(records[0].success);
        assert_eq!(records[0].data.as_ref().unwrap()["result"], json!(42));
    }

    #[tokio::test]
    async fn extracted_args_must_match_schema() {
        let llm = ScriptedLlm::new(|request| {
            assert!(system_of(request).contains("extract tool arguments"));
            Ok(r#"{"expression": 12}"#.into())
        });
        let runner = runner(llm, vec![Arc::new(Calculator)]);
        let records = runner
            .run(&ToolPlan::new("what's 6 * 7", names(&["calculator"])))
            .await;
        // Rejected by the schema, then parsed from the query.
        assert_eq!(records[0].data.as_ref().unwrap()["result"], json!(42));
    }

    #[tokio::test]
    async fn missing_tool_is_recorded_not_fatal() {
        let runner = runner(ScriptedLlm::failing(), vec![Arc::new(Echo("echo"))]);
        let mut plan = ToolPlan::new("x", names(&["ghost", "echo"]));
        plan.args.insert("echo".into(), json!({}));
        let records = runner.run(&plan).await;
        assert!(!records[0].success);
        assert!(records[0].error.as_ref().unwrap().contains("ghost"));
        assert!(records[1].success);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = runner(
            ScriptedLlm::failing(),
            vec![Arc::new(Flaky {
                calls: calls.clone(),
            })],
        );
        let mut plan = ToolPlan::new("x", names(&["flaky"]));
        plan.args.insert("flaky".into(), json!({}));
        let records = runner.run(&plan).await;
        assert!(records[0].success);
        assert_eq!(records[0].attempts, 2);
    }

    #[tokio::test]
    async fn permission_errors_are_not_retried() {
        let runner = runner(ScriptedLlm::failing(), vec![Arc::new(Broken)]);
        let mut plan = ToolPlan::new("x", names(&["broken"]));
        plan.args.insert("broken".into(), json!({}));
        let records = runner.run(&plan).await;
        assert!(!records[0].success);
        assert_eq!(records[0].attempts, 1);
    }

    #[tokio::test]
    async fn dependents_of_failed_tools_are_skipped() {
        let runner = runner(
            ScriptedLlm::failing(),
            vec![Arc::new(Broken), Arc::new(Echo("summarize")), Arc::new(Echo("other"))],
        );
        let mut plan = ToolPlan::new("x", names(&["broken", "summarize", "other"]));
        plan.args.insert("broken".into(), json!({}));
        plan.args.insert("summarize".into(), json!({}));
        plan.args.insert("other".into(), json!({}));
        plan.dependencies
            .insert("summarize".into(), names(&["broken"]));

        for parallel in [false, true] {
            plan.parallel = parallel;
            let records = runner.run(&plan).await;
            assert!(!records[0].success);
            assert!(records[1].skipped, "parallel={parallel}");
            assert!(records[2].success);
        }
    }

    #[tokio::test]
    async fn upstream_output_reaches_extraction_prompt() {
        let llm = ScriptedLlm::new(|request| {
            let prompt = request.last_user_message().unwrap_or("");
            assert!(prompt.contains("- first: {\"text\":\"payload\"}"));
            Ok(r#"{"text": "derived"}"#.into())
        });
        let runner = runner(llm, vec![Arc::new(Echo("first")), Arc::new(Echo("second"))]);
        let mut plan = ToolPlan::new("x", names(&["first", "second"]));
        plan.args.insert("first".into(), json!({"text": "payload"}));
        plan.dependencies.insert("second".into(), names(&["first"]));
        plan.parallel = true;

        let records = runner.run(&plan).await;
        assert_eq!(records[1].data, Some(json!({"text": "derived"})));
    }

    #[tokio::test]
    async fn sequential_mode_skips_tools_whose_inputs_come_later() {
        let runner = runner(
            ScriptedLlm::failing(),
            vec![Arc::new(Echo("a")), Arc::new(Echo("b"))],
        );
        let mut plan = ToolPlan::new("x", names(&["a", "b"]));
        plan.args.insert("a".into(), json!({}));
        plan.args.insert("b".into(), json!({}));
        plan.dependencies.insert("a".into(), names(&["b"]));
        let records = runner.run(&plan).await;
        assert!(records[0].skipped);
        assert!(records[1].success);
    }

    #[tokio::test]
    async fn selection_keeps_only_registered_tools() {
        let llm = ScriptedLlm::new(|request| {
            assert!(system_of(request).contains("select tools"));
            Ok(r#"{"tools":["calculator","teleporter","calculator"]}"#.into())
        });
        let runner = runner(llm, vec![Arc::new(Calculator)]);
        assert_eq!(runner.select_tools("add things", None).await, vec!["calculator"]);
    }

    #[tokio::test]
    async fn selection_with_empty_registry_makes_no_call() {
        let llm = ScriptedLlm::failing();
        let calls = llm.calls();
        let runner = runner(llm, Vec::new());
        assert!(runner.select_tools("anything", None).await.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }
}
