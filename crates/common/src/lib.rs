//! Common types shared across the Cortex crates.
//!
//! This crate holds the request-scoped data model (intents, memory records,
//! execution results), the request options accepted at the boundary, and the
//! error taxonomy every other crate reports through.

pub mod error;
pub mod intent;
pub mod memory;
pub mod request;
pub mod result;

pub use error::{CortexError, Result};
pub use intent::{dedup_ordered, ClassificationSource, IntentType, QueryIntent};
pub use memory::{
    ContextWindow, EpisodicMemoryRecord, EpisodicMetadata, EpisodicRelationships, MemoryContext,
    MemoryFailure, Scored, SemanticMemoryRecord, SemanticMetadata, SemanticRelationships,
    StoreKind,
};
pub use request::{ClassifyHints, ExecuteOptions, ResponseDetail};
pub use result::{ExecutionMetadata, ExecutionResult, StageTimings, ToolRunRecord};

/// Current time as Unix millis.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a prefixed unique ID.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}
