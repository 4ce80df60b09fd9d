//! Memory configuration and lookup filters.

use serde::{Deserialize, Serialize};

/// Tunables for context assembly.
///
/// The weights and threshold are deployment knobs; no particular value is
/// required for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default cap on episodic + semantic memories per context
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Minimum similarity for semantic hits
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Weight of recency in the episodic score
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Weight of `metadata.importance` in the episodic score
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,

    /// Candidates pulled from the episodic store before scoring
    #[serde(default = "default_episodic_fetch_limit")]
    pub episodic_fetch_limit: usize,

    /// Candidates pulled from the semantic store before scoring
    #[serde(default = "default_semantic_fetch_limit")]
    pub semantic_fetch_limit: usize,

    /// Filter episodic candidates by a free-text match against the query
    #[serde(default)]
    pub episodic_text_filter: bool,

    /// Per-store lookup timeout
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

fn default_max_results() -> usize {
    10
}

fn default_similarity_threshold() -> f32 {
    0.5
}

fn default_recency_weight() -> f32 {
    0.6
}

fn default_importance_weight() -> f32 {
    0.4
}

fn default_episodic_fetch_limit() -> usize {
    50
}

fn default_semantic_fetch_limit() -> usize {
    20
}

fn default_lookup_timeout_ms() -> u64 {
    5000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
            recency_weight: default_recency_weight(),
            importance_weight: default_importance_weight(),
            episodic_fetch_limit: default_episodic_fetch_limit(),
            semantic_fetch_limit: default_semantic_fetch_limit(),
            episodic_text_filter: false,
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

/// Filters for episodic `query` and `search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodicFilter {
    /// Keep records whose content or tags mention any term of this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Keep records carrying all of these tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Keep records at or after this Unix-millis timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EpisodicFilter {
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Lower-cased terms of at least three characters, in order of appearance.
pub(crate) fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
    {
        let word = word.to_lowercase();
        if !STOPWORDS.contains(&word.as_str()) && !out.contains(&word) {
            out.push(word);
        }
    }
    out
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "what", "which", "who", "how", "why", "when",
    "where", "that", "this", "with", "you", "your", "have", "has", "had", "did", "does", "not",
    "but", "can", "about", "from", "they", "them", "there", "their", "would", "could", "should",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_to_partial_config() {
        let config: MemoryConfig = toml::from_str("max_results = 4").unwrap();
        assert_eq!(config.max_results, 4);
        assert_eq!(config.similarity_threshold, 0.5);
        assert_eq!(config.episodic_fetch_limit, 50);
        assert!(!config.episodic_text_filter);
    }

    #[test]
    fn terms_skip_short_words_and_stopwords() {
        assert_eq!(
            terms("What programming language do I like? Python, python!"),
            vec!["programming", "language", "like", "python"]
        );
        assert!(terms("a an of").is_empty());
    }
}
