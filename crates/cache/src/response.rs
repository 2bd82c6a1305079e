//! Layer 1: session-scoped response cache.
//!
//! Keyed by (intent, domain, session fingerprint); matched by hybrid
//! similarity. Stale entries stay visible to the cache gate but are only
//! accepted while age < 2× TTL and quality >= 0.80.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cg_domain::config::{CacheLayerConfig, HybridConfig};
use cg_state::{tokenize, EmbeddingService, HybridScorer};

use crate::entry::{CacheEntry, Freshness};
use crate::layer::CacheLayer;

/// Stale entries are acceptable up to this multiple of their TTL…
const STALE_MAX_AGE_FACTOR: i64 = 2;
/// …and only at or above this quality.
const STALE_MIN_QUALITY: f64 = 0.80;

/// The cached payload for a full response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    pub query: String,
    pub answer: String,
    pub intent: String,
    #[serde(default)]
    pub claim_ids: Vec<String>,
}

/// A scored response-cache hit handed to the cache gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHit {
    pub entry: CacheEntry,
    pub response: CachedResponse,
    pub hybrid_score: f64,
    pub semantic: f64,
    pub keyword: f64,
    pub freshness: Freshness,
    /// True when the entry is acceptable under the staleness rules (fresh,
    /// or stale-but-recent with high quality).
    pub acceptable: bool,
}

pub struct ResponseCache {
    layer: Arc<CacheLayer>,
    embedder: Arc<EmbeddingService>,
    scorer: HybridScorer,
    top_k: usize,
    ttl_seconds: i64,
}

impl ResponseCache {
    pub fn new(
        config: &CacheLayerConfig,
        hybrid: &HybridConfig,
        embedder: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            layer: Arc::new(CacheLayer::new("response", config.max_entries)),
            embedder,
            scorer: HybridScorer {
                alpha: hybrid.alpha,
                semantic_threshold: hybrid.semantic_threshold,
                keyword_threshold: hybrid.keyword_threshold,
            },
            top_k: hybrid.top_k,
            ttl_seconds: config.ttl_seconds,
        }
    }

    /// The inner layer, for sweeper registration.
    pub fn layer(&self) -> Arc<CacheLayer> {
        self.layer.clone()
    }

    /// Session-scoped fingerprint: intent + domain + session + normalized
    /// query.
    pub fn cache_key(session_id: &str, intent: &str, domain: &str, query: &str) -> String {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let digest = Sha256::digest(format!("{intent}|{domain}|{session_id}|{normalized}").as_bytes());
        format!("resp-{}", hex::encode(&digest[..12]))
    }

    pub async fn put(
        &self,
        session_id: &str,
        domain: &str,
        response: CachedResponse,
        quality_score: f64,
    ) {
        let key = Self::cache_key(session_id, &response.intent, domain, &response.query);
        let mut entry = CacheEntry::new(
            key,
            serde_json::to_value(&response).unwrap_or(serde_json::Value::Null),
            domain,
            self.ttl_seconds,
        );
        entry.embedding = self.embedder.embed(&response.query);
        entry.text_tokens = tokenize(&response.query);
        entry.quality_score = quality_score;
        entry.session_id = Some(session_id.to_owned());
        entry.intent = Some(response.intent.clone());
        self.layer.upsert(entry).await;
    }

    /// Best hybrid match for this query inside the allowed domains,
    /// restricted to the session. Returns `None` on a full miss.
    pub fn lookup(&self, session_id: &str, query: &str, domains: &[&str]) -> Option<ResponseHit> {
        let query_embedding = self.embedder.embed(query);
        let query_tokens = tokenize(query);

        let ranked = self
            .layer
            .lookup(&self.scorer, &query_embedding, &query_tokens, domains, self.top_k);

        let now = Utc::now();
        for m in ranked {
            let Some(entry) = self.layer.get(&m.key) else {
                continue;
            };
            if entry.session_id.as_deref() != Some(session_id) {
                continue;
            }
            let Ok(response) = serde_json::from_value::<CachedResponse>(entry.payload.clone()) else {
                continue;
            };
            let freshness = entry.freshness(now);
            let acceptable = match freshness {
                Freshness::Fresh => true,
                Freshness::Stale => {
                    entry.age_seconds(now) < entry.ttl_seconds.max(0) * STALE_MAX_AGE_FACTOR
                        && entry.quality_score >= STALE_MIN_QUALITY
                }
            };
            return Some(ResponseHit {
                entry,
                response,
                hybrid_score: m.hybrid,
                semantic: m.semantic,
                keyword: m.keyword,
                freshness,
                acceptable,
            });
        }
        None
    }
}
