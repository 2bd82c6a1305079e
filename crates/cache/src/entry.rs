//! The entry shape shared by all three cache layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Freshness of an entry at evaluation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Strictly inside the TTL window.
    Fresh,
    /// At or past expiry. Stale entries remain visible to the cache gate
    /// but are only accepted under the layer's staleness rules.
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Tokenized text used for the keyword half of hybrid lookup.
    #[serde(default)]
    pub text_tokens: Vec<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    /// Quality in [0, 1]; entries below the sweeper's floor are pruned.
    pub quality_score: f64,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Value, domain: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            key: key.into(),
            embedding: Vec::new(),
            text_tokens: Vec::new(),
            payload,
            created_at: Utc::now(),
            ttl_seconds,
            quality_score: 0.5,
            domain: domain.into(),
            session_id: None,
            intent: None,
            access_count: 0,
            last_accessed: None,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.ttl_seconds.max(0))
    }

    /// Strict `<`: an entry exactly at its TTL is stale.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        if now < self.expires_at() {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.freshness(now) == Freshness::Stale
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }

    /// Recency key for LRU eviction: last access, else creation.
    pub fn lru_instant(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_boundary_is_strict() {
        let mut entry = CacheEntry::new("k", Value::Null, "general", 60);
        entry.created_at = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(entry.freshness(Utc::now()), Freshness::Stale);

        entry.created_at = Utc::now() - chrono::Duration::seconds(59);
        assert_eq!(entry.freshness(Utc::now()), Freshness::Fresh);
    }

    #[test]
    fn lru_prefers_last_access() {
        let mut entry = CacheEntry::new("k", Value::Null, "general", 60);
        assert_eq!(entry.lru_instant(), entry.created_at);
        let later = entry.created_at + chrono::Duration::seconds(30);
        entry.last_accessed = Some(later);
        assert_eq!(entry.lru_instant(), later);
    }
}
