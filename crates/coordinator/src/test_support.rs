//! Scripted completion client for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cortex_common::{CortexError, Result};
use cortex_llm::{LlmClient, LlmRequest, LlmResponse};

type Responder = Box<dyn Fn(&LlmRequest) -> Result<String> + Send + Sync>;

pub struct ScriptedLlm {
    responder: Responder,
    calls: Arc<Mutex<Vec<LlmRequest>>>,
}

impl ScriptedLlm {
    pub fn new(responder: impl Fn(&LlmRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always returns `reply`.
    pub fn replying(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Returns each scripted reply once, then errors.
    pub fn sequence(replies: Vec<Result<String>>) -> Self {
        let replies = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CortexError::Llm("script exhausted".into())))
        })
    }

    /// Every call fails with a transport error.
    pub fn failing() -> Self {
        Self::new(|_| Err(CortexError::Llm("connection refused".into())))
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.calls.lock().unwrap().push(request.clone());
        (self.responder)(&request).map(|text| LlmResponse::text("scripted", text))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// The system prompt of a request, or "".
pub fn system_of(request: &LlmRequest) -> &str {
    request.system_prompt.as_deref().unwrap_or("")
}
