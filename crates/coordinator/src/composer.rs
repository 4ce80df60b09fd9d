//! Response composition.
//!
//! Pure aggregation into the fixed [`ExecutionResult`] shape. Counters are
//! computed before the detail level trims any payload, so trimming never
//! changes them.

use cortex_common::{
    CortexError, ExecutionMetadata, ExecutionResult, MemoryContext, QueryIntent, ResponseDetail,
    StageTimings, ToolRunRecord,
};
use tracing::debug;

/// The parts of one request's outcome.
#[derive(Debug)]
pub struct Composition {
    pub intent: QueryIntent,
    pub context: Option<MemoryContext>,
    pub tool_results: Vec<ToolRunRecord>,
    /// The terminal completion's text, or why there is none
    pub completion: Result<String, CortexError>,
    pub timings: StageTimings,
    /// Total wall-clock time
    pub execution_time: u64,
    pub deadline_exceeded: bool,
    /// Appended to the intent's reasoning
    pub notes: Vec<String>,
}

pub fn compose(
    query: &str,
    parts: Composition,
    include_reasoning: bool,
    detail: ResponseDetail,
) -> ExecutionResult {
    let Composition {
        intent,
        context,
        tool_results,
        completion,
        timings,
        execution_time,
        deadline_exceeded,
        notes,
    } = parts;

    let memory_retrieved = context.as_ref().map_or(0, MemoryContext::len);
    let degraded_context = context.as_ref().is_some_and(MemoryContext::is_degraded);
    let tools_executed = tool_results.iter().filter(|r| r.success).count();

    let reasoning = if include_reasoning {
        std::iter::once(intent.reasoning.as_str())
            .chain(notes.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        String::new()
    };

    let (success, response, error) = match completion {
        Ok(text) => (true, text, None),
        Err(e) => (false, String::new(), Some(e.to_string())),
    };

    let memory_context = match detail {
        ResponseDetail::Full => context,
        ResponseDetail::Summary => context.map(|mut ctx| {
            ctx.strip_vectors();
            ctx
        }),
        ResponseDetail::Minimal => None,
    };

    debug!(
        query_len = query.len(),
        success,
        memory_retrieved,
        tools_executed,
        execution_time,
        "Composed result"
    );

    ExecutionResult {
        success,
        response,
        metadata: ExecutionMetadata {
            execution_time,
            memory_retrieved,
            tools_executed,
            confidence: intent.confidence,
            classification_time: timings.classification_time,
            memory_search_time: timings.memory_search_time,
            tool_execution_time: timings.tool_execution_time,
            llm_response_time: timings.llm_response_time,
            degraded_context,
            deadline_exceeded,
        },
        intent,
        memory_context,
        tool_results,
        reasoning,
        error,
    }
}
