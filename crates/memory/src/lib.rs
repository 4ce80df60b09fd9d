//! Memory for Cortex.
//!
//! Two structurally different stores feed every request:
//!
//! - **Episodic**: time-ordered interaction records, scoped by user and session
//! - **Semantic**: concept/fact records searched by vector similarity, scoped by user
//!
//! [`ContextAssembler`] queries both concurrently, scores the results and
//! merges them into one bounded [`cortex_common::MemoryContext`].

pub mod embedding;
pub mod retrieval;
pub mod store;
pub mod types;

pub use embedding::{build_embedder, Embedder, EmbeddingConfig, EmbeddingError, HashingEmbedder, HttpEmbedder};
#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedder;
pub use retrieval::{render_background, BuildOptions, ContextAssembler, MemoryFocus};
pub use store::{
    cosine_similarity, EpisodicStore, InMemoryEpisodicStore, InMemorySemanticStore, SemanticStore,
};
pub use types::{EpisodicFilter, MemoryConfig};
