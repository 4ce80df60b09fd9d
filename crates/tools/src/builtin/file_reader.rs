//! Sandboxed file reads.
//!
//! Paths containing `..` are rejected outright. Everything else is
//! canonicalized (resolving symlinks) and must land under one of the
//! allowed directories. An empty allow-list denies every path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use crate::error::{ToolError, ToolResult};
use crate::tool::{schema_for, Tool};

const NAME: &str = "file_reader";
const DEFAULT_MAX_BYTES: usize = 256 * 1024;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FileReaderInput {
    /// Path of the file to read
    pub path: String,
    /// Read at most this many bytes
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

pub struct FileReader {
    allowed_dirs: Vec<PathBuf>,
    max_bytes: usize,
}

impl FileReader {
    pub fn new(allowed_dirs: Vec<PathBuf>) -> Self {
        Self {
            allowed_dirs,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn denied(reason: String) -> ToolError {
        ToolError::PermissionDenied {
            tool: NAME.to_string(),
            reason,
        }
    }

    /// Resolve `raw` to a canonical path inside the sandbox.
    pub fn resolve(&self, raw: &str) -> ToolResult<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ToolError::invalid_input(NAME, "path must not be empty"));
        }
        if self.allowed_dirs.is_empty() {
            return Err(Self::denied("no directories are allowed".to_string()));
        }
        if Path::new(raw)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Self::denied(format!(
                "path '{raw}' contains '..' components which are not allowed"
            )));
        }

        let canonical = Path::new(raw)
            .canonicalize()
            .map_err(|e| ToolError::failed(NAME, format!("cannot resolve '{raw}': {e}")))?;

        let inside = self.allowed_dirs.iter().any(|base| {
            let base = base.canonicalize().unwrap_or_else(|_| base.clone());
            canonical.starts_with(&base)
        });
        if !inside {
            return Err(Self::denied(format!(
                "path '{}' is outside the allowed directories",
                canonical.display()
            )));
        }

        if !canonical.is_file() {
            return Err(ToolError::invalid_input(
                NAME,
                format!("'{}' is not a regular file", canonical.display()),
            ));
        }
        Ok(canonical)
    }
}

static PATH_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?:^|\s)((?:/|\./)[^\s'"`]+)"#).ok());

#[async_trait]
impl Tool for FileReader {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Read a text file from an allowed directory"
    }

    fn input_schema(&self) -> Value {
        schema_for::<FileReaderInput>()
    }

    fn args_from_query(&self, query: &str) -> Option<Value> {
        let re = PATH_PATTERN.as_ref()?;
        let path = re
            .captures(query)?
            .get(1)?
            .as_str()
            .trim_end_matches(|c: char| ",;:!?)".contains(c));
        Some(json!({ "path": path }))
    }

    async fn invoke(&self, args: Value) -> ToolResult<Value> {
        let input: FileReaderInput =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_input(NAME, e.to_string()))?;
        let path = self.resolve(&input.path)?;
        let max_bytes = input.max_bytes.unwrap_or(self.max_bytes).min(self.max_bytes);

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ToolError::failed(NAME, format!("cannot open '{}': {e}", path.display())))?;
        let size = file
            .metadata()
            .await
            .map(|m| m.len())
            .unwrap_or_default();

        let mut buf = Vec::with_capacity(max_bytes.min(size as usize));
        file.take(max_bytes as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ToolError::failed(NAME, format!("read failed: {e}")))?;

        Ok(json!({
            "path": path.display().to_string(),
            "content": String::from_utf8_lossy(&buf),
            "bytes": buf.len(),
            "truncated": (buf.len() as u64) < size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, FileReader) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello sandbox").unwrap();
        let reader = FileReader::new(vec![dir.path().to_path_buf()]);
        (dir, reader)
    }

    #[tokio::test]
    async fn reads_file_inside_sandbox() {
        let (dir, reader) = sandbox();
        let path = dir.path().join("notes.txt");
        let output = reader
            .invoke(json!({"path": path.display().to_string()}))
            .await
            .unwrap();
        assert_eq!(output["content"], "hello sandbox");
        assert_eq!(output["truncated"], false);
    }

    #[tokio::test]
    async fn truncates_to_max_bytes() {
        let (dir, reader) = sandbox();
        let path = dir.path().join("notes.txt");
        let output = reader
            .invoke(json!({"path": path.display().to_string(), "max_bytes": 5}))
            .await
            .unwrap();
        assert_eq!(output["content"], "hello");
        assert_eq!(output["truncated"], true);
    }

    #[test]
    fn rejects_parent_components() {
        let (dir, reader) = sandbox();
        let sneaky = format!("{}/../etc/passwd", dir.path().display());
        assert!(matches!(
            reader.resolve(&sneaky),
            Err(ToolError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn rejects_paths_outside_allowed_dirs() {
        let (_dir, reader) = sandbox();
        let other = TempDir::new().unwrap();
        let outside = other.path().join("secret.txt");
        std::fs::write(&outside, "secret").unwrap();
        assert!(matches!(
            reader.resolve(&outside.display().to_string()),
            Err(ToolError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn rejects_directories_and_missing_files() {
        let (dir, reader) = sandbox();
        assert!(reader.resolve(&dir.path().display().to_string()).is_err());
        assert!(reader
            .resolve(&dir.path().join("missing.txt").display().to_string())
            .is_err());
    }

    #[tokio::test]
    async fn empty_allow_list_denies_every_path() {
        let dir = TempDir::new().unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "TOP SECRET").unwrap();

        let reader = FileReader::new(Vec::new());
        for path in [secret.display().to_string(), "/etc/passwd".to_string()] {
            let err = reader.invoke(json!({ "path": path })).await.unwrap_err();
            assert!(matches!(err, ToolError::PermissionDenied { .. }));
        }
    }

    #[test]
    fn extracts_path_from_query() {
        let reader = FileReader::new(Vec::new());
        let args = reader.args_from_query("Read /tmp/report.txt, please").unwrap();
        assert_eq!(args["path"], "/tmp/report.txt");
        assert!(reader.args_from_query("read my notes").is_none());
    }
}
