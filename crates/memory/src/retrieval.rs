//! Memory context assembly.
//!
//! Both stores are queried concurrently. Each branch has its own timeout and
//! a failure in one never aborts the other: the context comes back degraded
//! instead of as an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_common::{
    now_millis, ContextWindow, CortexError, EpisodicMemoryRecord, MemoryContext, MemoryFailure,
    Result, Scored, SemanticMemoryRecord, StoreKind,
};
use tracing::{debug, instrument, warn};

use crate::embedding::Embedder;
use crate::store::{EpisodicStore, SemanticStore};
use crate::types::{EpisodicFilter, MemoryConfig};

/// Per-call options for [`ContextAssembler::build_context`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Total cap across both memory types; falls back to the configured default
    pub max_results: Option<usize>,
    /// Falls back to the configured default
    pub similarity_threshold: Option<f32>,
    /// Episodic record that must survive truncation
    pub pinned_record_id: Option<String>,
}

impl BuildOptions {
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn pinned(mut self, record_id: impl Into<String>) -> Self {
        self.pinned_record_id = Some(record_id.into());
        self
    }
}

/// Queries both stores and merges the results into one bounded context.
pub struct ContextAssembler {
    episodic: Arc<dyn EpisodicStore>,
    semantic: Arc<dyn SemanticStore>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl ContextAssembler {
    pub fn new(
        episodic: Arc<dyn EpisodicStore>,
        semantic: Arc<dyn SemanticStore>,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            episodic,
            semantic,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Assemble the memory context for one request. Never fails.
    #[instrument(skip(self, query, options), fields(query_len = query.len()))]
    pub async fn build_context(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
        options: &BuildOptions,
    ) -> MemoryContext {
        let started = Instant::now();
        let max_results = options.max_results.unwrap_or(self.config.max_results);
        let threshold = options
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);
        let timeout_ms = self.config.lookup_timeout_ms;

        let episodic = with_timeout(timeout_ms, self.fetch_episodic(user_id, session_id, query));
        let semantic = with_timeout(timeout_ms, self.fetch_semantic(user_id, query, threshold));
        let (episodic, semantic) = tokio::join!(episodic, semantic);

        let mut failures = Vec::new();
        let episodic = match episodic {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Episodic lookup failed, continuing without it");
                failures.push(MemoryFailure {
                    store: StoreKind::Episodic,
                    error: e.to_string(),
                });
                Vec::new()
            }
        };
        let semantic = match semantic {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Semantic lookup failed, continuing without it");
                failures.push(MemoryFailure {
                    store: StoreKind::Semantic,
                    error: e.to_string(),
                });
                Vec::new()
            }
        };

        let mut episodic = score_episodic(
            episodic,
            self.config.recency_weight,
            self.config.importance_weight,
        );
        let mut semantic = score_semantic(semantic);

        let (episodic_slots, semantic_slots) = allocate_slots(
            max_results,
            episodic.len(),
            semantic.len(),
            episodic.first().map(|m| m.score),
            semantic.first().map(|m| m.score),
        );
        let episodic_slots = ensure_pinned(
            &mut episodic,
            episodic_slots,
            max_results,
            options.pinned_record_id.as_deref(),
        );
        let semantic_slots = semantic_slots.min(max_results.saturating_sub(episodic_slots));
        episodic.truncate(episodic_slots);
        semantic.truncate(semantic_slots);

        let now = now_millis();
        let start_time = episodic
            .iter()
            .map(|m| m.record.timestamp)
            .min()
            .unwrap_or(now);
        let returned = episodic.len() + semantic.len();
        let relevance_score = if returned == 0 {
            0.0
        } else {
            let total: f32 = episodic
                .iter()
                .map(|m| m.score)
                .chain(semantic.iter().map(|m| m.score))
                .sum();
            total / returned as f32
        };

        debug!(
            episodic = episodic.len(),
            semantic = semantic.len(),
            failures = failures.len(),
            relevance = relevance_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built memory context"
        );

        MemoryContext {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            episodic_memories: episodic,
            semantic_memories: semantic,
            context_window: ContextWindow {
                start_time: start_time.min(now),
                end_time: now,
                relevance_score,
                degraded: !failures.is_empty(),
            },
            failures,
        }
    }

    async fn fetch_episodic(
        &self,
        user_id: &str,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<EpisodicMemoryRecord>> {
        let mut filter = EpisodicFilter::default().with_limit(self.config.episodic_fetch_limit);
        if self.config.episodic_text_filter {
            filter = filter.with_text(query);
        }
        self.episodic.query(user_id, session_id, &filter).await
    }

    async fn fetch_semantic(
        &self,
        user_id: &str,
        query: &str,
        threshold: f32,
    ) -> Result<Vec<Scored<SemanticMemoryRecord>>> {
        let vector = self.embedder.embed(query).await?;
        self.semantic
            .search(user_id, &vector, threshold, self.config.semantic_fetch_limit)
            .await
    }
}

async fn with_timeout<T>(
    timeout_ms: u64,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(CortexError::Timeout(timeout_ms)),
    }
}

/// Score episodic candidates by recency and importance, best first.
///
/// Recency decays linearly from the newest candidate (1.0) to the oldest
/// (0.0); a single-instant span scores 1.0 for every record.
pub fn score_episodic(
    records: Vec<EpisodicMemoryRecord>,
    recency_weight: f32,
    importance_weight: f32,
) -> Vec<Scored<EpisodicMemoryRecord>> {
    let (min_t, max_t) = records
        .iter()
        .fold((u64::MAX, 0u64), |(lo, hi), r| {
            (lo.min(r.timestamp), hi.max(r.timestamp))
        });
    let span = max_t.saturating_sub(min_t);

    let (wr, wi) = if recency_weight + importance_weight > 0.0 {
        (recency_weight.max(0.0), importance_weight.max(0.0))
    } else {
        (1.0, 1.0)
    };

    let mut scored: Vec<Scored<EpisodicMemoryRecord>> = records
        .into_iter()
        .map(|record| {
            let recency = if span == 0 {
                1.0
            } else {
                (record.timestamp - min_t) as f32 / span as f32
            };
            let importance = record.metadata.importance.clamp(0.0, 1.0);
            let score = ((wr * recency + wi * importance) / (wr + wi)).clamp(0.0, 1.0);
            Scored::new(record, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    scored
}

/// Keep the store's similarity as the score, best first.
pub fn score_semantic(
    records: Vec<Scored<SemanticMemoryRecord>>,
) -> Vec<Scored<SemanticMemoryRecord>> {
    let mut scored: Vec<_> = records
        .into_iter()
        .map(|m| Scored::new(m.record, m.score.clamp(0.0, 1.0)))
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    scored
}

/// Split `k` slots between the two memory types.
///
/// Proportional to candidate counts; each non-empty type gets at least one
/// slot when `k >= 2`. With a single slot it goes to the better top score.
pub fn allocate_slots(
    k: usize,
    episodic: usize,
    semantic: usize,
    top_episodic: Option<f32>,
    top_semantic: Option<f32>,
) -> (usize, usize) {
    if k == 0 {
        return (0, 0);
    }
    if episodic == 0 || semantic == 0 {
        return (episodic.min(k), semantic.min(k));
    }
    if episodic + semantic <= k {
        return (episodic, semantic);
    }
    if k == 1 {
        return if top_semantic.unwrap_or(0.0) > top_episodic.unwrap_or(0.0) {
            (0, 1)
        } else {
            (1, 0)
        };
    }

    let share = (k as f64 * episodic as f64 / (episodic + semantic) as f64).round() as usize;
    let mut e = share.clamp(1, k - 1).min(episodic);
    let s = (k - e).min(semantic);
    // Hand slots the semantic side cannot use back to episodic.
    e = (k - s).min(episodic);
    (e, s)
}

/// Make sure the pinned record is within the first `slots` episodic entries.
/// Returns the (possibly grown) episodic slot count.
fn ensure_pinned(
    episodic: &mut Vec<Scored<EpisodicMemoryRecord>>,
    slots: usize,
    max_results: usize,
    pinned: Option<&str>,
) -> usize {
    let Some(pinned) = pinned else {
        return slots;
    };
    if max_results == 0 {
        return slots;
    }
    let Some(pos) = episodic.iter().position(|m| m.record.id == pinned) else {
        return slots;
    };
    if pos < slots {
        return slots;
    }

    let record = episodic.remove(pos);
    if slots == 0 {
        // Take a slot from the semantic side.
        episodic.insert(0, record);
        return 1;
    }
    episodic.insert(slots - 1, record);
    slots
}

/// Which half of the context a prompt should lead with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFocus {
    /// Conversation history first
    Episodic,
    /// Known facts first; history is secondary
    Semantic,
}

/// Render the context as a background block for a prompt.
///
/// Returns an empty string when there is nothing to show.
pub fn render_background(context: &MemoryContext, focus: MemoryFocus) -> String {
    let episodic = render_episodic(&context.episodic_memories);
    let semantic = render_semantic(&context.semantic_memories);

    let sections: Vec<String> = match focus {
        MemoryFocus::Episodic => [
            section("Conversation history", &episodic),
            section("Known facts", &semantic),
        ]
        .into_iter()
        .flatten()
        .collect(),
        MemoryFocus::Semantic => [
            section("Known facts", &semantic),
            section("Conversation history (secondary)", &episodic),
        ]
        .into_iter()
        .flatten()
        .collect(),
    };

    let mut out = sections.join("\n\n");
    if context.is_degraded() && !out.is_empty() {
        out.push_str("\n\n(Some memory sources were unavailable; this context may be incomplete.)");
    }
    out
}

fn section(title: &str, lines: &[String]) -> Option<String> {
    (!lines.is_empty()).then(|| format!("## {}\n{}", title, lines.join("\n")))
}

fn render_episodic(memories: &[Scored<EpisodicMemoryRecord>]) -> Vec<String> {
    memories
        .iter()
        .map(|m| {
            let tags = if m.record.metadata.tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", m.record.metadata.tags.join(", "))
            };
            format!(
                "- ({:.2}) {}{}",
                m.score,
                truncate(&m.record.content, 500),
                tags
            )
        })
        .collect()
}

fn render_semantic(memories: &[Scored<SemanticMemoryRecord>]) -> Vec<String> {
    memories
        .iter()
        .map(|m| {
            format!(
                "- ({:.2}) {}: {}",
                m.score,
                m.record.concept,
                truncate(&m.record.description, 500)
            )
        })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
