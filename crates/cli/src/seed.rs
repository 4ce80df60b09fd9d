//! Loading memory records from a JSON seed file into the in-process stores.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use cortex_common::{EpisodicMemoryRecord, SemanticMemoryRecord};
use cortex_memory::{Embedder, EpisodicStore, SemanticStore};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub episodic: Vec<SeedEpisode>,
    #[serde(default)]
    pub semantic: Vec<SeedFact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedEpisode {
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    /// Unix millis; defaults to now
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub importance: Option<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFact {
    pub user_id: String,
    pub concept: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// Counts of what was loaded.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub episodic: usize,
    pub semantic: usize,
}

impl SeedFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))
    }

    /// Write every record into the stores. Facts are embedded as
    /// `"<concept>: <description>"`.
    pub async fn load(
        self,
        episodic: &dyn EpisodicStore,
        semantic: &dyn SemanticStore,
        embedder: &Arc<dyn Embedder>,
    ) -> anyhow::Result<SeedReport> {
        let mut report = SeedReport::default();

        for episode in self.episodic {
            let mut record =
                EpisodicMemoryRecord::new(episode.user_id, episode.session_id, episode.content)
                    .with_tags(episode.tags);
            if let Some(ts) = episode.timestamp {
                record = record.with_timestamp(ts);
            }
            if let Some(importance) = episode.importance {
                record = record.with_importance(importance);
            }
            episodic.append(record).await?;
            report.episodic += 1;
        }

        for fact in self.semantic {
            let text = format!("{}: {}", fact.concept, fact.description);
            let vector = embedder
                .embed(&text)
                .await
                .with_context(|| format!("Failed to embed concept '{}'", fact.concept))?;
            let mut record =
                SemanticMemoryRecord::new(fact.user_id, fact.concept, fact.description)
                    .with_vector(vector);
            if let Some(category) = fact.category {
                record = record.with_category(category);
            }
            semantic.upsert(record).await?;
            report.semantic += 1;
        }

        info!(
            episodic = report.episodic,
            semantic = report.semantic,
            "Seeded memory stores"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_memory::{EpisodicFilter, HashingEmbedder, InMemoryEpisodicStore, InMemorySemanticStore};
    use std::io::Write;

    const SEED: &str = r#"{
        "episodic": [
            {"userId": "u1", "sessionId": "s1", "content": "We talked about Rust lifetimes",
             "timestamp": 1700000000000, "importance": 0.9, "tags": ["rust"]},
            {"userId": "u2", "sessionId": "s9", "content": "Someone else's chat"}
        ],
        "semantic": [
            {"userId": "u1", "concept": "Rust", "description": "A systems language", "category": "tech"}
        ]
    }"#;

    #[tokio::test]
    async fn loads_records_into_stores() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();

        let episodic = InMemoryEpisodicStore::new();
        let semantic = InMemorySemanticStore::with_dimension(32);
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));

        let seed = SeedFile::from_path(file.path()).unwrap();
        let report = seed.load(&episodic, &semantic, &embedder).await.unwrap();
        assert_eq!(report, SeedReport { episodic: 2, semantic: 1 });

        let records = episodic
            .query("u1", "s1", &EpisodicFilter::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 1_700_000_000_000);
        assert_eq!(records[0].metadata.tags, vec!["rust"]);

        let query = embedder.embed("Rust: A systems language").await.unwrap();
        let hits = semantic.search("u1", &query, 0.5, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.metadata.category, "tech");
    }

    #[test]
    fn sections_are_optional() {
        let seed: SeedFile = serde_json::from_str("{}").unwrap();
        assert!(seed.episodic.is_empty());
        assert!(seed.semantic.is_empty());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = SeedFile::from_path(Path::new("/nonexistent/seed.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/seed.json"));
    }
}
