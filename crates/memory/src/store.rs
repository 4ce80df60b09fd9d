//! Store adapter contracts and the in-process reference stores.
//!
//! The orchestrator only reads through these traits. Concrete backends
//! (graph, relational, vector index) live behind them.

use std::collections::HashMap;

use async_trait::async_trait;
use cortex_common::{
    new_id, CortexError, EpisodicMemoryRecord, Result, Scored, SemanticMemoryRecord,
};
use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::types::{terms, EpisodicFilter};

/// Time-ordered, relationship-linked records scoped by user and session.
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    /// Store a record and return its ID.
    async fn append(&self, record: EpisodicMemoryRecord) -> Result<String>;

    /// Records for one session, most recent first.
    async fn query(
        &self,
        user_id: &str,
        session_id: &str,
        filter: &EpisodicFilter,
    ) -> Result<Vec<EpisodicMemoryRecord>>;

    /// Free-text search across all of a user's sessions.
    async fn search(
        &self,
        user_id: &str,
        text: &str,
        filter: &EpisodicFilter,
    ) -> Result<Vec<Scored<EpisodicMemoryRecord>>>;

    /// Replace a record owned by `user_id`.
    async fn update(&self, user_id: &str, record: EpisodicMemoryRecord) -> Result<()>;

    /// Delete a record owned by `user_id`. Returns whether it existed.
    async fn delete(&self, user_id: &str, id: &str) -> Result<bool>;
}

/// Concept records indexed by vector similarity, scoped by user.
#[async_trait]
pub trait SemanticStore: Send + Sync {
    /// Insert or replace a record by ID.
    async fn upsert(&self, record: SemanticMemoryRecord) -> Result<String>;

    /// Records with similarity >= `threshold`, best first. Scores are in [0, 1].
    async fn search(
        &self,
        user_id: &str,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Scored<SemanticMemoryRecord>>>;
}

/// Episodic store kept in process memory.
#[derive(Default)]
pub struct InMemoryEpisodicStore {
    records: RwLock<Vec<EpisodicMemoryRecord>>,
}

impl InMemoryEpisodicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn matches_filter(record: &EpisodicMemoryRecord, filter: &EpisodicFilter) -> bool {
    if let Some(since) = filter.since {
        if record.timestamp < since {
            return false;
        }
    }
    if !filter
        .tags
        .iter()
        .all(|t| record.metadata.tags.iter().any(|rt| rt.eq_ignore_ascii_case(t)))
    {
        return false;
    }
    match filter.text.as_deref() {
        Some(text) => {
            let wanted = terms(text);
            wanted.is_empty() || term_overlap(record, &wanted) > 0
        }
        None => true,
    }
}

/// Number of `wanted` terms found in the record's content or tags.
fn term_overlap(record: &EpisodicMemoryRecord, wanted: &[String]) -> usize {
    let haystack = terms(&format!(
        "{} {}",
        record.content,
        record.metadata.tags.join(" ")
    ));
    wanted.iter().filter(|w| haystack.contains(w)).count()
}

fn most_recent_first(a: &EpisodicMemoryRecord, b: &EpisodicMemoryRecord) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl EpisodicStore for InMemoryEpisodicStore {
    async fn append(&self, mut record: EpisodicMemoryRecord) -> Result<String> {
        if record.id.is_empty() {
            record.id = new_id("ep");
        }
        let id = record.id.clone();
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == id) {
            return Err(CortexError::Validation(format!(
                "episodic record '{id}' already exists"
            )));
        }
        debug!(record_id = %id, user_id = %record.user_id, "Appending episodic record");
        records.push(record);
        Ok(id)
    }

    #[instrument(skip(self, filter))]
    async fn query(
        &self,
        user_id: &str,
        session_id: &str,
        filter: &EpisodicFilter,
    ) -> Result<Vec<EpisodicMemoryRecord>> {
        let mut results: Vec<EpisodicMemoryRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.user_id == user_id && r.session_id == session_id)
            .filter(|r| matches_filter(r, filter))
            .cloned()
            .collect();

        results.sort_by(most_recent_first);
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    #[instrument(skip(self, filter))]
    async fn search(
        &self,
        user_id: &str,
        text: &str,
        filter: &EpisodicFilter,
    ) -> Result<Vec<Scored<EpisodicMemoryRecord>>> {
        let wanted = terms(text);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<Scored<EpisodicMemoryRecord>> = self
            .records
            .read()
            .iter()
            .filter(|r| r.user_id == user_id && matches_filter(r, filter))
            .filter_map(|r| {
                let hits = term_overlap(r, &wanted);
                (hits > 0).then(|| Scored::new(r.clone(), hits as f32 / wanted.len() as f32))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| most_recent_first(&a.record, &b.record))
        });
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn update(&self, user_id: &str, record: EpisodicMemoryRecord) -> Result<()> {
        let mut records = self.records.write();
        let existing = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| {
                CortexError::Validation(format!("episodic record '{}' not found", record.id))
            })?;
        if existing.user_id != user_id || record.user_id != user_id {
            return Err(CortexError::Validation(format!(
                "episodic record '{}' is not owned by '{}'",
                record.id, user_id
            )));
        }
        *existing = record;
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
        let mut records = self.records.write();
        let Some(pos) = records.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        if records[pos].user_id != user_id {
            return Err(CortexError::Validation(format!(
                "episodic record '{id}' is not owned by '{user_id}'"
            )));
        }
        records.remove(pos);
        Ok(true)
    }
}

/// Semantic store kept in process memory, searched by cosine similarity.
#[derive(Default)]
pub struct InMemorySemanticStore {
    records: RwLock<HashMap<String, SemanticMemoryRecord>>,
    /// Hits per record ID. Kept apart from the records so repeated searches
    /// return identical results.
    access: RwLock<HashMap<String, u32>>,
    dimension: Option<usize>,
}

impl InMemorySemanticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject vectors whose length differs from `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// How many searches have returned this record.
    pub fn access_count(&self, id: &str) -> u32 {
        self.access.read().get(id).copied().unwrap_or(0)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != len => Err(CortexError::MemoryUnavailable(format!(
                "vector has {len} dimensions, store expects {expected}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Cosine similarity clamped to [0, 1]; zero for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[async_trait]
impl SemanticStore for InMemorySemanticStore {
    async fn upsert(&self, mut record: SemanticMemoryRecord) -> Result<String> {
        self.check_dimension(record.vector.len())?;
        if record.id.is_empty() {
            record.id = new_id("sem");
        }
        let id = record.id.clone();
        debug!(record_id = %id, concept = %record.concept, "Upserting semantic record");
        self.records.write().insert(id.clone(), record);
        Ok(id)
    }

    #[instrument(skip(self, vector), fields(dims = vector.len()))]
    async fn search(
        &self,
        user_id: &str,
        vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Scored<SemanticMemoryRecord>>> {
        self.check_dimension(vector.len())?;

        let mut results: Vec<Scored<SemanticMemoryRecord>> = self
            .records
            .read()
            .values()
            .filter(|r| r.user_id == user_id)
            .filter_map(|r| {
                let score = cosine_similarity(vector, &r.vector);
                (score >= threshold).then(|| Scored::new(r.clone(), score))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        results.truncate(limit);

        let mut access = self.access.write();
        for hit in &results {
            *access.entry(hit.record.id.clone()).or_insert(0) += 1;
        }

        Ok(results)
    }
}
