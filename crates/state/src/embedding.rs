//! Deterministic local embeddings for semantic matching.
//!
//! The gateway needs embeddings for cache lookups, claim retrieval, and the
//! topic index, but must not compete with the LLM endpoints for resources.
//! This service hashes token unigrams and bigrams into a fixed 384-dim
//! feature space and L2-normalizes the result — zero model downloads, zero
//! tokens, sub-millisecond latency, and identical vectors for identical
//! text across processes.

use sha2::{Digest, Sha256};

use crate::retrieval::tokenize;

/// Vector width, matching the 384-dim space the rest of the system assumes.
pub const EMBEDDING_DIM: usize = 384;

/// CPU-only embedding service. Stateless and cheap to share behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct EmbeddingService;

impl EmbeddingService {
    pub fn new() -> Self {
        Self
    }

    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Embed one text. Empty input yields the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vec![0.0; EMBEDDING_DIM];
        }

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for token in &tokens {
            add_feature(&mut vector, token, 1.0);
        }
        // Bigrams capture local word order.
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            add_feature(&mut vector, &bigram, 0.5);
        }

        l2_normalize(&mut vector);
        vector
    }

    pub fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Hash a feature into two buckets with signed weights; spreading each token
/// across buckets reduces collision damage at this width.
fn add_feature(vector: &mut [f32], feature: &str, weight: f32) {
    let digest = Sha256::digest(feature.as_bytes());
    for chunk in digest.chunks_exact(4).take(2) {
        let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let bucket = (raw as usize) % EMBEDDING_DIM;
        let sign = if raw & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic() {
        let svc = EmbeddingService::new();
        assert_eq!(svc.embed("syrian hamster breeders"), svc.embed("syrian hamster breeders"));
    }

    #[test]
    fn identical_text_has_unit_similarity() {
        let svc = EmbeddingService::new();
        let v = svc.embed("hamster cage prices");
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_scores_above_unrelated() {
        let svc = EmbeddingService::new();
        let q = svc.embed("find syrian hamster breeders online");
        let related = svc.embed("syrian hamster breeders with online stores");
        let unrelated = svc.embed("quarterly revenue projections for steel mills");
        assert!(cosine_similarity(&q, &related) > cosine_similarity(&q, &unrelated));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let svc = EmbeddingService::new();
        let v = svc.embed("");
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }
}
