//! HTTP GET with a response size cap.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ToolError, ToolResult};
use crate::tool::{schema_for, Tool};

const NAME: &str = "http_fetch";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HttpFetchInput {
    /// Absolute http:// or https:// URL
    pub url: String,
    /// Truncate the body after this many bytes
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

pub struct HttpFetch {
    client: reqwest::Client,
    max_bytes: usize,
    timeout: Option<Duration>,
}

impl HttpFetch {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

static URL_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).ok());

fn check_url(url: &str) -> ToolResult<reqwest::Url> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| ToolError::invalid_input(NAME, format!("bad URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ToolError::PermissionDenied {
            tool: NAME.to_string(),
            reason: format!("scheme '{other}' is not allowed"),
        }),
    }
}

/// Cut `body` to at most `max` bytes without splitting a UTF-8 sequence.
fn cap_utf8(body: &str, max: usize) -> (&str, bool) {
    if body.len() <= max {
        return (body, false);
    }
    let mut end = max;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    (&body[..end], true)
}

#[async_trait]
impl Tool for HttpFetch {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Fetch a URL with HTTP GET and return the status and (size-capped) body"
    }

    fn input_schema(&self) -> Value {
        schema_for::<HttpFetchInput>()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn args_from_query(&self, query: &str) -> Option<Value> {
        let re = URL_PATTERN.as_ref()?;
        let url = re
            .find(query)?
            .as_str()
            .trim_end_matches(|c: char| ".,;:!?)".contains(c));
        Some(json!({ "url": url }))
    }

    async fn invoke(&self, args: Value) -> ToolResult<Value> {
        let input: HttpFetchInput =
            serde_json::from_value(args).map_err(|e| ToolError::invalid_input(NAME, e.to_string()))?;
        let url = check_url(&input.url)?;
        let max_bytes = input.max_bytes.unwrap_or(self.max_bytes).min(self.max_bytes);

        debug!(url = %url, max_bytes, "Fetching URL");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ToolError::failed(NAME, format!("request failed: {e}")))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::failed(NAME, format!("failed to read body: {e}")))?;

        if !status.is_success() {
            let (snippet, _) = cap_utf8(&body, 512);
            return Err(ToolError::failed(NAME, format!("{status}: {snippet}")));
        }

        let (body, truncated) = cap_utf8(&body, max_bytes);
        Ok(json!({
            "url": url.as_str(),
            "status": status.as_u16(),
            "contentType": content_type,
            "body": body,
            "truncated": truncated,
        }))
    }
}
