//! Configuration for the orchestrator.
//!
//! # Config file security
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use cortex_llm::LlmConfig;
use cortex_memory::{EmbeddingConfig, MemoryConfig};
use cortex_tools::ToolsConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration, one section per collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Intent classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_temperature")]
    pub temperature: f32,

    #[serde(default = "default_classifier_max_tokens")]
    pub max_tokens: u32,

    /// Per-completion timeout
    #[serde(default = "default_classifier_timeout")]
    pub timeout_ms: u64,

    /// Use the keyword heuristic when the model output is unusable.
    /// When disabled, unusable output yields a zero-confidence conversation.
    #[serde(default = "default_true")]
    pub heuristic_fallback: bool,

    /// Default concurrency cap for batch classification
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_classifier_temperature() -> f32 {
    0.1
}

fn default_classifier_max_tokens() -> u32 {
    400
}

fn default_classifier_timeout() -> u64 {
    15_000
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            temperature: default_classifier_temperature(),
            max_tokens: default_classifier_max_tokens(),
            timeout_ms: default_classifier_timeout(),
            heuristic_fallback: true,
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

/// Execution router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Per-invocation tool timeout
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_ms: u64,

    /// Extra attempts after a retryable tool failure
    #[serde(default = "default_tool_max_retries")]
    pub tool_max_retries: u32,

    /// Timeout for the answer-producing completion, retries included
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_ms: u64,

    /// Timeout for tool selection and argument extraction calls
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_ms: u64,

    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,

    #[serde(default = "default_answer_max_tokens")]
    pub answer_max_tokens: u32,
}

fn default_tool_timeout() -> u64 {
    10_000
}

fn default_tool_max_retries() -> u32 {
    1
}

fn default_completion_timeout() -> u64 {
    30_000
}

fn default_extraction_timeout() -> u64 {
    10_000
}

fn default_answer_temperature() -> f32 {
    0.7
}

fn default_answer_max_tokens() -> u32 {
    1024
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout(),
            tool_max_retries: default_tool_max_retries(),
            completion_timeout_ms: default_completion_timeout(),
            extraction_timeout_ms: default_extraction_timeout(),
            answer_temperature: default_answer_temperature(),
            answer_max_tokens: default_answer_max_tokens(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Security
    ///
    /// On Unix systems, this function validates that:
    /// - The file is a regular file
    /// - The file is not world-writable
    /// - The file is not world-readable if it contains an API key
    ///
    /// It also warns if API keys are stored in the config file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.llm.api_key.is_some() || config.embedding.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. For better security, \
                 use environment variables instead (OPENAI_API_KEY, ANTHROPIC_API_KEY).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    ///
    /// Use this only for testing or when you've already validated the file.
    pub fn from_file_unchecked(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Validate config file permissions on Unix systems.
///
/// Requirements:
/// - File must be a regular file (not a directory, device, etc.)
/// - File must not be world-writable (mode & 0o002 == 0)
/// - If the file contains an API key, it must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). \
             Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_api_key = contains_api_key(&content);

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

/// Whether any uncommented line assigns a non-empty `api_key`.
fn contains_api_key(content: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return false;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                key.trim() == "api_key" && !matches!(value.trim(), "" | "\"\"" | "''")
            }
            None => false,
        }
    })
}
