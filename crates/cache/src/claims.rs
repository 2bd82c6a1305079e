//! Layer 2: cross-session claim cache.
//!
//! Keyed by claim id (content hash); shared across sessions. TTL comes from
//! each claim's confidence; deprecated claims are dropped at write time and
//! coverage is reported to the cache gate.

use std::sync::Arc;

use chrono::Utc;

use cg_domain::claim::ClaimRow;
use cg_domain::config::{CacheLayerConfig, HybridConfig};
use cg_state::{tokenize, EmbeddingService, HybridScorer};

use crate::entry::CacheEntry;
use crate::layer::CacheLayer;

/// Claim-layer lookup result: the matching claims plus how well they cover
/// the query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimCoverage {
    pub claims: Vec<ClaimRow>,
    /// Mean hybrid score of the matched claims, in [0, 1]. The cache gate
    /// treats >= 0.80 as sufficient to synthesize from claims alone.
    pub coverage_score: f64,
}

pub struct ClaimCache {
    layer: Arc<CacheLayer>,
    embedder: Arc<EmbeddingService>,
    scorer: HybridScorer,
    top_k: usize,
    fallback_ttl: i64,
}

impl ClaimCache {
    pub fn new(
        config: &CacheLayerConfig,
        hybrid: &HybridConfig,
        embedder: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            layer: Arc::new(CacheLayer::new("claims", config.max_entries)),
            embedder,
            scorer: HybridScorer {
                alpha: hybrid.alpha,
                semantic_threshold: hybrid.semantic_threshold,
                keyword_threshold: hybrid.keyword_threshold,
            },
            top_k: hybrid.top_k,
            fallback_ttl: config.ttl_seconds,
        }
    }

    pub fn layer(&self) -> Arc<CacheLayer> {
        self.layer.clone()
    }

    /// Cache a registry claim under its content-hash id. Deprecated claims
    /// are ignored.
    pub async fn put(&self, claim: &ClaimRow, domain: &str) {
        if claim.deprecated {
            return;
        }
        let ttl = if claim.ttl_seconds > 0 {
            claim.ttl_seconds
        } else {
            self.fallback_ttl
        };
        let mut entry = CacheEntry::new(
            claim.claim_id.clone(),
            serde_json::to_value(claim).unwrap_or(serde_json::Value::Null),
            domain,
            ttl,
        );
        entry.created_at = claim.last_verified;
        entry.embedding = if claim.embedding.is_empty() {
            self.embedder.embed(&claim.statement)
        } else {
            claim.embedding.clone()
        };
        entry.text_tokens = tokenize(&claim.statement);
        entry.quality_score = claim.quality_composite();
        self.layer.upsert(entry).await;
    }

    /// Fresh claims matching the query within the allowed domains, with an
    /// aggregate coverage score.
    pub fn lookup(&self, query: &str, domains: &[&str]) -> ClaimCoverage {
        let query_embedding = self.embedder.embed(query);
        let query_tokens = tokenize(query);
        let ranked = self
            .layer
            .lookup(&self.scorer, &query_embedding, &query_tokens, domains, self.top_k);

        let now = Utc::now();
        let mut claims = Vec::new();
        let mut total = 0.0;
        for m in &ranked {
            let Some(entry) = self.layer.get(&m.key) else {
                continue;
            };
            // Stale claims never count toward coverage.
            if entry.is_expired(now) {
                continue;
            }
            if let Ok(claim) = serde_json::from_value::<ClaimRow>(entry.payload.clone()) {
                total += m.hybrid;
                claims.push(claim);
            }
        }

        let coverage_score = if claims.is_empty() {
            0.0
        } else {
            total / claims.len() as f64
        };
        ClaimCoverage {
            claims,
            coverage_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::claim::{ClaimType, Confidence};
    use cg_domain::config::CacheConfig;

    fn make_cache() -> ClaimCache {
        let config = CacheConfig::default();
        ClaimCache::new(
            &config.claims,
            &config.hybrid,
            Arc::new(EmbeddingService::new()),
        )
    }

    fn make_claim(statement: &str) -> ClaimRow {
        let mut row = ClaimRow::new("s1", ClaimType::Retailer, statement);
        row.confidence = Confidence::High;
        row.ttl_seconds = 48 * 3600;
        row.evidence_handles = vec!["h1".into()];
        row
    }

    #[tokio::test]
    async fn matching_claim_contributes_coverage() {
        let cache = make_cache();
        cache
            .put(&make_claim("HamsterHaus sells syrian hamsters online"), "research")
            .await;

        let coverage = cache.lookup("syrian hamsters online HamsterHaus", &["research"]);
        assert_eq!(coverage.claims.len(), 1);
        assert!(coverage.coverage_score > 0.5);
    }

    #[tokio::test]
    async fn deprecated_claims_are_not_cached() {
        let cache = make_cache();
        let mut claim = make_claim("stale retailer fact");
        claim.deprecated = true;
        cache.put(&claim, "research").await;
        assert!(cache.layer().is_empty());
    }

    #[tokio::test]
    async fn expired_claims_do_not_count() {
        let cache = make_cache();
        let mut claim = make_claim("perishable price point for cages");
        claim.ttl_seconds = 60;
        claim.last_verified = Utc::now() - chrono::Duration::seconds(120);
        cache.put(&claim, "pricing").await;

        let coverage = cache.lookup("perishable price point for cages", &["pricing"]);
        assert!(coverage.claims.is_empty());
        assert_eq!(coverage.coverage_score, 0.0);
    }
}
