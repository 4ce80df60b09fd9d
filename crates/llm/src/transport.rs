//! Shared HTTP handling for the provider clients.

use cortex_common::{CortexError, Result};

/// Map a non-success provider response to [`CortexError::LlmStatus`].
///
/// A `Retry-After` header is appended to the body so the retry wrapper can
/// honour it.
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut body = response.text().await.unwrap_or_default();
    if let Some(secs) = retry_after {
        body.push_str(&format!(" (Retry-After: {secs})"));
    }

    Err(CortexError::LlmStatus {
        status: status.as_u16(),
        body: format!("{provider}: {body}"),
    })
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> CortexError {
    if err.is_timeout() {
        CortexError::Llm(format!("{provider} request timed out: {err}"))
    } else {
        CortexError::Llm(format!("{provider} request failed: {err}"))
    }
}

pub(crate) fn decode_error(provider: &str, err: reqwest::Error) -> CortexError {
    CortexError::Llm(format!("Failed to parse {provider} response: {err}"))
}
