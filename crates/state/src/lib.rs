//! Shared-state backbone: the content-addressed artifact store, the local
//! embedding service, hybrid (semantic × keyword) retrieval scoring, and the
//! freshness oracle for claim TTLs.

pub mod artifact;
pub mod embedding;
pub mod freshness;
pub mod retrieval;

pub use artifact::{ArtifactRecord, ArtifactStore};
pub use embedding::{cosine_similarity, EmbeddingService, EMBEDDING_DIM};
pub use freshness::FreshnessOracle;
pub use retrieval::{bm25_like, tokenize, HybridScorer, ScoredMatch};
