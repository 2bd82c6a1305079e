//! Hybrid retrieval scoring: cosine similarity over embeddings fused with a
//! BM25-like keyword score. Candidates failing either layer threshold are
//! rejected before fusion, and results come back sorted by the fused score.

use std::collections::HashMap;

use crate::embedding::cosine_similarity;

/// BM25 shape parameters. The corpus here is small (cache entries, claims),
/// so classic defaults work fine.
const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Lowercased alphanumeric tokens, length >= 2.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_owned)
        .collect()
}

/// BM25-like score of `query_tokens` against one document, normalized to
/// [0, 1] by dividing through the self-score of the query.
///
/// `avg_doc_len` is the mean token count across the candidate set; pass the
/// document's own length when scoring a single candidate in isolation.
pub fn bm25_like(query_tokens: &[String], doc_tokens: &[String], avg_doc_len: f64) -> f64 {
    if query_tokens.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }

    let mut term_freq: HashMap<&str, f64> = HashMap::new();
    for token in doc_tokens {
        *term_freq.entry(token.as_str()).or_insert(0.0) += 1.0;
    }

    let doc_len = doc_tokens.len() as f64;
    let len_norm = 1.0 - BM25_B + BM25_B * doc_len / avg_doc_len.max(1.0);

    let mut score = 0.0;
    let mut max_score = 0.0;
    for token in query_tokens {
        let tf = term_freq.get(token.as_str()).copied().unwrap_or(0.0);
        score += tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * len_norm);
        // The best any term can do is a saturated match.
        max_score += BM25_K1 + 1.0;
    }
    if max_score <= 0.0 {
        0.0
    } else {
        (score / max_score).clamp(0.0, 1.0)
    }
}

/// One candidate that survived both thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch<K> {
    pub key: K,
    pub semantic: f64,
    pub keyword: f64,
    pub hybrid: f64,
}

/// Reusable hybrid scorer configured with fusion weight and thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HybridScorer {
    pub alpha: f64,
    pub semantic_threshold: f64,
    pub keyword_threshold: f64,
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            semantic_threshold: 0.5,
            keyword_threshold: 0.1,
        }
    }
}

impl HybridScorer {
    /// Score candidates `(key, embedding, text_tokens)` against a query and
    /// return survivors sorted by fused score, truncated to `top_k`.
    ///
    /// Domain filtering must happen *before* this call — the scorer never
    /// sees candidates from other domains.
    pub fn rank<K: Clone>(
        &self,
        query_embedding: &[f32],
        query_tokens: &[String],
        candidates: &[(K, Vec<f32>, Vec<String>)],
        top_k: usize,
    ) -> Vec<ScoredMatch<K>> {
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let avg_doc_len = candidates
            .iter()
            .map(|(_, _, tokens)| tokens.len() as f64)
            .sum::<f64>()
            / candidates.len() as f64;

        let mut matches: Vec<ScoredMatch<K>> = candidates
            .iter()
            .filter_map(|(key, embedding, tokens)| {
                let semantic = cosine_similarity(query_embedding, embedding);
                if semantic < self.semantic_threshold {
                    return None;
                }
                let keyword = bm25_like(query_tokens, tokens, avg_doc_len);
                if keyword < self.keyword_threshold {
                    return None;
                }
                let hybrid = self.alpha * semantic + (1.0 - self.alpha) * keyword;
                Some(ScoredMatch {
                    key: key.clone(),
                    semantic,
                    keyword,
                    hybrid,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.hybrid.partial_cmp(&a.hybrid).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingService;

    #[test]
    fn tokenize_drops_short_and_punctuation() {
        assert_eq!(
            tokenize("Find a hamster-cage, now!"),
            vec!["find", "hamster", "cage", "now"]
        );
    }

    #[test]
    fn bm25_full_overlap_beats_partial() {
        let q = tokenize("hamster cage");
        let full = tokenize("hamster cage store");
        let partial = tokenize("cage of parrots only");
        let full_score = bm25_like(&q, &full, 3.0);
        let partial_score = bm25_like(&q, &partial, 3.0);
        assert!(full_score > partial_score);
        assert!(partial_score > 0.0);
    }

    #[test]
    fn bm25_no_overlap_is_zero() {
        let q = tokenize("hamster");
        let doc = tokenize("quarterly steel revenue");
        assert_eq!(bm25_like(&q, &doc, 3.0), 0.0);
    }

    #[test]
    fn rank_rejects_below_thresholds_and_sorts() {
        let svc = EmbeddingService::new();
        let query = "syrian hamster breeders";
        let q_emb = svc.embed(query);
        let q_tokens = tokenize(query);

        let near = "syrian hamster breeders online shop";
        let far = "industrial steel pipe fittings catalogue";
        let candidates = vec![
            ("near", svc.embed(near), tokenize(near)),
            ("far", svc.embed(far), tokenize(far)),
        ];

        let scorer = HybridScorer::default();
        let ranked = scorer.rank(&q_emb, &q_tokens, &candidates, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].key, "near");
        assert!(ranked[0].hybrid > 0.5);
    }

    #[test]
    fn rank_truncates_to_top_k() {
        let svc = EmbeddingService::new();
        let query = "hamster food";
        let q_emb = svc.embed(query);
        let q_tokens = tokenize(query);
        let texts = [
            "hamster food pellets",
            "hamster food mix",
            "hamster food brands",
        ];
        let candidates: Vec<_> = texts
            .iter()
            .map(|t| (*t, svc.embed(t), tokenize(t)))
            .collect();
        let ranked = HybridScorer::default().rank(&q_emb, &q_tokens, &candidates, 2);
        assert!(ranked.len() <= 2);
    }
}
