//! Memory record types shared by the store adapters and the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{new_id, now_millis};

/// Links between episodic records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicRelationships {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMetadata {
    /// Importance in [0, 1]
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for EpisodicMetadata {
    fn default() -> Self {
        Self {
            importance: default_importance(),
            tags: Vec::new(),
        }
    }
}

fn default_importance() -> f32 {
    0.5
}

/// A time-ordered record of one interaction turn, scoped to a user and session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicMemoryRecord {
    /// Store-assigned ID
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    /// Unix millis
    pub timestamp: u64,
    pub content: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: EpisodicMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<EpisodicRelationships>,
}

impl EpisodicMemoryRecord {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("ep"),
            user_id: user_id.into(),
            session_id: session_id.into(),
            timestamp: now_millis(),
            content: content.into(),
            context: HashMap::new(),
            metadata: EpisodicMetadata::default(),
            relationships: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.metadata.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMetadata {
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_semantic_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub access_count: u32,
}

impl Default for SemanticMetadata {
    fn default() -> Self {
        Self {
            category: String::new(),
            confidence: default_semantic_confidence(),
            access_count: 0,
        }
    }
}

fn default_semantic_confidence() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticRelationships {
    #[serde(default)]
    pub similar: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// A concept/fact record indexed by vector similarity, scoped to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticMemoryRecord {
    pub id: String,
    pub user_id: String,
    pub concept: String,
    pub description: String,
    /// Opaque to the orchestrator; only the semantic store compares vectors.
    #[serde(default)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: SemanticMetadata,
    #[serde(default)]
    pub relationships: SemanticRelationships,
}

impl SemanticMemoryRecord {
    pub fn new(
        user_id: impl Into<String>,
        concept: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("sem"),
            user_id: user_id.into(),
            concept: concept.into(),
            description: description.into(),
            vector: Vec::new(),
            metadata: SemanticMetadata::default(),
            relationships: SemanticRelationships::default(),
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = category.into();
        self
    }

    /// The text that gets embedded for this record.
    pub fn embedding_text(&self) -> String {
        format!("{}: {}", self.concept, self.description)
    }
}

/// A record paired with its relevance score in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored<T> {
    #[serde(flatten)]
    pub record: T,
    pub score: f32,
}

impl<T> Scored<T> {
    pub fn new(record: T, score: f32) -> Self {
        Self { record, score }
    }
}

/// Which memory store a lookup went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Episodic,
    Semantic,
}

/// A store lookup that failed or timed out while assembling context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFailure {
    pub store: StoreKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindow {
    pub start_time: u64,
    pub end_time: u64,
    /// Mean score of the returned memories
    pub relevance_score: f32,
    /// Set when a store failed, making `relevance_score` a lower bound.
    #[serde(default)]
    pub degraded: bool,
}

/// The bounded, scored memory assembled for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryContext {
    pub user_id: String,
    pub session_id: String,
    /// Most relevant first
    pub episodic_memories: Vec<Scored<EpisodicMemoryRecord>>,
    /// Most relevant first
    pub semantic_memories: Vec<Scored<SemanticMemoryRecord>>,
    pub context_window: ContextWindow,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<MemoryFailure>,
}

impl MemoryContext {
    pub fn empty(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            episodic_memories: Vec::new(),
            semantic_memories: Vec::new(),
            context_window: ContextWindow {
                start_time: now,
                end_time: now,
                relevance_score: 0.0,
                degraded: false,
            },
            failures: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.episodic_memories.len() + self.semantic_memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_degraded(&self) -> bool {
        self.context_window.degraded
    }

    /// Drop raw vectors from semantic records.
    pub fn strip_vectors(&mut self) {
        for memory in &mut self.semantic_memories {
            memory.record.vector.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scored_record_flattens_into_record_fields() {
        let record = EpisodicMemoryRecord::new("u1", "s1", "likes Python").with_importance(0.9);
        let json = serde_json::to_value(Scored::new(record, 0.75)).unwrap();
        assert_eq!(json["content"], "likes Python");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["score"], 0.75);
    }

    #[test]
    fn importance_is_clamped() {
        let record = EpisodicMemoryRecord::new("u1", "s1", "x").with_importance(3.0);
        assert_eq!(record.metadata.importance, 1.0);
    }

    #[test]
    fn empty_context_has_no_memories() {
        let ctx = MemoryContext::empty("u1", "s1");
        assert!(ctx.is_empty());
        assert!(!ctx.is_degraded());
        assert_eq!(ctx.context_window.relevance_score, 0.0);
    }

    #[test]
    fn strip_vectors_keeps_records() {
        let mut ctx = MemoryContext::empty("u1", "s1");
        ctx.semantic_memories.push(Scored::new(
            SemanticMemoryRecord::new("u1", "rust", "a language").with_vector(vec![0.1; 8]),
            0.9,
        ));
        ctx.strip_vectors();
        assert_eq!(ctx.len(), 1);
        assert!(ctx.semantic_memories[0].record.vector.is_empty());
    }
}
