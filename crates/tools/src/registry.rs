//! Tool registry for discovery and invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{ToolError, ToolResult};
use crate::schema;
use crate::tool::{Tool, ToolMetadata};

/// Maximum number of tools in a registry
pub const REGISTRY_TOOLS_COUNT_MAX: usize = 1000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total_invocations: u64,
    pub successful_invocations: u64,
    pub failed_invocations: u64,
    pub timed_out_invocations: u64,
    /// Arguments rejected before the tool ran
    pub rejected_invocations: u64,
    pub per_tool: HashMap<String, u64>,
}

/// Named tools shared by all requests.
///
/// Registration is expected at startup; invocation is read-only apart from
/// the statistics counters.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    stats: RwLock<RegistryStats>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            stats: RwLock::new(RegistryStats::default()),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn register<T: Tool + 'static>(&self, tool: T) -> ToolResult<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> ToolResult<()> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(ToolError::Config {
                reason: "tool name must not be empty".into(),
            });
        }

        let mut tools = self.tools.write();
        if tools.len() >= REGISTRY_TOOLS_COUNT_MAX {
            return Err(ToolError::Config {
                reason: format!("registry is at capacity ({REGISTRY_TOOLS_COUNT_MAX} tools)"),
            });
        }
        if tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered { name });
        }

        info!(tool = %name, "Registering tool");
        tools.insert(name, tool);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> ToolResult<()> {
        if self.tools.write().remove(name).is_none() {
            return Err(ToolError::NotFound {
                name: name.to_string(),
            });
        }
        info!(tool = %name, "Unregistered tool");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Metadata for every tool, sorted by name.
    pub fn list(&self) -> Vec<ToolMetadata> {
        let mut metadata: Vec<ToolMetadata> =
            self.tools.read().values().map(|t| t.metadata()).collect();
        metadata.sort_by(|a, b| a.name.cmp(&b.name));
        metadata
    }

    pub fn names(&self) -> Vec<String> {
        self.list().into_iter().map(|m| m.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Invoke with the registry's default timeout.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult<Value> {
        self.invoke_with_timeout(name, args, self.default_timeout).await
    }

    /// Validate `args` against the tool's schema and run it under a timeout.
    ///
    /// A tool that declares its own timeout uses that instead of `limit`.
    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        args: Value,
        limit: Duration,
    ) -> ToolResult<Value> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        if let Err(reason) = schema::validate(&tool.input_schema(), &args) {
            self.stats.write().rejected_invocations += 1;
            return Err(ToolError::InvalidInput {
                tool: name.to_string(),
                reason,
            });
        }

        let limit = tool.timeout().unwrap_or(limit);
        let timeout_ms = limit.as_millis() as u64;
        debug!(tool = %name, timeout_ms, "Invoking tool");

        let start = Instant::now();
        let result = timeout(limit, tool.invoke(args)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        {
            let mut stats = self.stats.write();
            stats.total_invocations += 1;
            *stats.per_tool.entry(name.to_string()).or_insert(0) += 1;
            match &result {
                Ok(Ok(_)) => stats.successful_invocations += 1,
                Ok(Err(_)) => stats.failed_invocations += 1,
                Err(_) => stats.timed_out_invocations += 1,
            }
        }

        match result {
            Ok(Ok(output)) => {
                debug!(tool = %name, duration_ms, "Tool invocation completed");
                Ok(output)
            }
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool invocation failed");
                Err(e)
            }
            Err(_) => {
                warn!(tool = %name, timeout_ms, "Tool invocation timed out");
                Err(ToolError::ExecutionTimeout {
                    tool: name.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input back"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "required": ["message"],
                "properties": { "message": { "type": "string" } }
            })
        }
        async fn invoke(&self, args: Value) -> ToolResult<Value> {
            Ok(args["message"].clone())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "A slow tool"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
        async fn invoke(&self, _args: Value) -> ToolResult<Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!("done"))
        }
    }

    #[test]
    fn register_and_list() {
        let registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        registry.register(EchoTool).unwrap();

        assert!(registry.contains("echo"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["echo", "slow"]);
        assert_eq!(registry.list()[0].description, "Echoes input back");
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(matches!(
            registry.register(EchoTool),
            Err(ToolError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn unregister_removes_tool() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.unregister("echo").unwrap();
        assert!(!registry.contains("echo"));
        assert!(matches!(
            registry.unregister("echo"),
            Err(ToolError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn invoke_returns_output() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let output = registry
            .invoke("echo", json!({"message": "hello world"}))
            .await
            .unwrap();
        assert_eq!(output, json!("hello world"));
        assert_eq!(registry.stats().successful_invocations, 1);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_fails() {
        let registry = ToolRegistry::new();
        let result = registry.invoke("nonexistent", json!({})).await;
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }

    #[tokio::test]
    async fn invoke_validates_arguments_first() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let result = registry.invoke("echo", json!({"message": 3})).await;
        assert!(matches!(result, Err(ToolError::InvalidInput { .. })));
        let stats = registry.stats();
        assert_eq!(stats.rejected_invocations, 1);
        assert_eq!(stats.total_invocations, 0);
    }

    #[tokio::test]
    async fn tool_timeout_overrides_caller_limit() {
        let registry = ToolRegistry::new();
        registry.register(SlowTool).unwrap();
        let result = registry
            .invoke_with_timeout("slow", json!({}), Duration::from_secs(60))
            .await;
        assert!(matches!(
            result,
            Err(ToolError::ExecutionTimeout { timeout_ms: 50, .. })
        ));
        assert_eq!(registry.stats().timed_out_invocations, 1);
    }
}
