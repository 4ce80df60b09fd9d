//! Built-in tools.

mod calculator;
mod file_reader;
mod http_fetch;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use calculator::{evaluate, extract_expression, Calculator};
pub use file_reader::FileReader;
pub use http_fetch::HttpFetch;

use crate::error::ToolResult;
use crate::registry::ToolRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directories `file_reader` may read from; empty disables the tool
    #[serde(default)]
    pub allowed_dirs: Vec<PathBuf>,

    #[serde(default = "default_true")]
    pub http_fetch_enabled: bool,

    #[serde(default = "default_http_max_bytes")]
    pub http_max_bytes: usize,
}

fn default_true() -> bool {
    true
}

fn default_http_max_bytes() -> usize {
    64 * 1024
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_dirs: Vec::new(),
            http_fetch_enabled: true,
            http_max_bytes: default_http_max_bytes(),
        }
    }
}

/// Register `calculator`, plus `file_reader` when any directory is allowed
/// and `http_fetch` when enabled.
pub fn register_builtins(registry: &ToolRegistry, config: &ToolsConfig) -> ToolResult<()> {
    registry.register(Calculator)?;
    if !config.allowed_dirs.is_empty() {
        registry.register(FileReader::new(config.allowed_dirs.clone()))?;
    }
    if config.http_fetch_enabled {
        registry.register(HttpFetch::new(config.http_max_bytes))?;
    }
    Ok(())
}
